use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    config::{load_config, load_config_from},
    export::parse_export_type,
    pipeline::parse_steps,
    protocol_client::DownloadOptions,
    ArtifactFilter, ArtifactPreview, OperatorClient, PageView, Presentation, RunFilter, SceneFilter,
};
use serde_json::{Map, Value};
use shared::domain::{ArtifactId, SceneId};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Operator console for the point-cloud pipeline service")]
struct Cli {
    /// Config file; defaults to $ROBOROUTER_CONFIG or ./operator.toml.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Overrides the configured service base URL.
    #[arg(long)]
    api_base: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Health, metadata, stats, config and models.
    Status,
    Ping,
    Scenes {
        #[arg(long)]
        query: Option<String>,
        #[arg(long, default_value_t = 0)]
        offset: u64,
        #[arg(long)]
        limit: Option<u64>,
    },
    Artifacts {
        scene_id: String,
        #[arg(long = "type")]
        type_contains: Option<String>,
        #[arg(long)]
        exports_only: bool,
        #[arg(long, default_value_t = 0)]
        offset: u64,
    },
    Runs {
        #[arg(long, conflicts_with = "only_passed")]
        only_failed: bool,
        #[arg(long)]
        only_passed: bool,
        #[arg(long, default_value_t = 0)]
        offset: u64,
    },
    Ingest {
        source_uri: String,
        #[arg(long)]
        crs: String,
        /// Sensor metadata as a JSON object.
        #[arg(long)]
        sensor_meta: Option<String>,
    },
    Upload {
        path: PathBuf,
    },
    Run {
        scene_id: String,
        /// Comma-separated: registration,segmentation,change_detection.
        #[arg(long, value_delimiter = ',', default_value = "registration,segmentation,change_detection")]
        steps: Vec<String>,
        /// `key=value`; values parse as JSON when they can.
        #[arg(long = "set")]
        overrides: Vec<String>,
    },
    Report {
        scene_id: String,
    },
    Gates {
        scene_id: String,
    },
    Policy {
        export_type: String,
        crs: String,
    },
    Export {
        scene_id: String,
        export_type: String,
        crs: String,
    },
    Latest {
        scene_id: String,
        artifact_type: String,
    },
    Url {
        artifact_id: String,
        #[arg(long)]
        filename: Option<String>,
        #[arg(long)]
        attachment: bool,
    },
    RefreshUrl {
        artifact_id: String,
    },
    Meta {
        artifact_id: String,
    },
    Open {
        artifact_id: String,
    },
    #[command(subcommand)]
    Csv(CsvCommand),
    DeleteArtifact {
        artifact_id: String,
    },
    DeleteScene {
        scene_id: String,
    },
    Cleanup,
}

#[derive(Subcommand, Debug)]
enum CsvCommand {
    Scenes,
    Runs,
    Metrics { scene_id: String },
    Artifact { artifact_id: String },
    Listing { scene_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config_from(Some(path), |key| std::env::var(key).ok())?,
        None => load_config()?,
    };
    if let Some(api_base) = cli.api_base {
        config.api_base = api_base;
    }
    info!(api_base = %config.api_base, "operator: using service");
    let client = OperatorClient::new(config).context("failed to build client")?;

    match cli.command {
        Command::Status => {
            let snapshot = client.bootstrap().await;
            print_json(&serde_json::json!({
                "health": snapshot.health.map(|h| h.status),
                "meta": snapshot.meta,
                "stats": snapshot.stats,
                "config": snapshot.config,
                "models": snapshot.models,
                "allowed_crs": client.state().allowed_crs().await,
            }))?;
        }
        Command::Ping => {
            let ping = client.auth_ping().await?;
            println!("authorized={}", ping.authorized);
        }
        Command::Scenes {
            query,
            offset,
            limit,
        } => {
            let pager = client.scene_pager();
            let limit = limit.unwrap_or(client.config().page_size);
            let view = pager
                .load(offset, limit, SceneFilter::matching(query.unwrap_or_default()))
                .await?;
            print_page(&view)?;
        }
        Command::Artifacts {
            scene_id,
            type_contains,
            exports_only,
            offset,
        } => {
            let pager = client.artifact_pager(SceneId::from(scene_id));
            let filters = ArtifactFilter {
                type_contains,
                exports_only,
            };
            let view = pager.load(offset, client.config().page_size, filters).await?;
            print_page(&view)?;
        }
        Command::Runs {
            only_failed,
            only_passed,
            offset,
        } => {
            let filters = RunFilter::All
                .with_only_failed(only_failed)
                .with_only_passed(only_passed);
            let view = client
                .run_pager()
                .load(offset, client.config().page_size, filters)
                .await?;
            print_page(&view)?;
        }
        Command::Ingest {
            source_uri,
            crs,
            sensor_meta,
        } => {
            let sensor_meta = sensor_meta
                .map(|raw| serde_json::from_str::<Value>(&raw))
                .transpose()
                .context("--sensor-meta must be JSON")?;
            let response = client.ingest(&source_uri, &crs, sensor_meta).await?;
            print_json(&response)?;
        }
        Command::Upload { path } => {
            let response = client.upload_file(&path).await?;
            println!("uploaded to {}", response.path);
        }
        Command::Run {
            scene_id,
            steps,
            overrides,
        } => {
            let steps = parse_steps(&steps)?;
            let overrides = parse_overrides(&overrides)?;
            let outcome = client
                .pipeline()
                .run_with_overrides(&SceneId::from(scene_id), &steps, overrides)
                .await?;
            print_json(&serde_json::json!({
                "scene_id": outcome.scene_id,
                "steps": outcome.steps,
                "plan": outcome.plan,
                "produced": outcome.response.artifacts,
                "artifacts": outcome.artifacts.len(),
                "metrics": outcome.metrics.len(),
                "gates": outcome.gates,
            }))?;
        }
        Command::Report { scene_id } => {
            let outcome = client
                .pipeline()
                .generate_report(&SceneId::from(scene_id))
                .await?;
            print_json(&outcome.response)?;
        }
        Command::Gates { scene_id } => {
            let gates = client
                .reconciler()
                .reconcile_gates(&SceneId::from(scene_id))
                .await?;
            print_json(&gates)?;
            println!("overall: {}", if gates.all_passed() { "pass" } else { "fail" });
        }
        Command::Policy { export_type, crs } => {
            let decision = client
                .exports()
                .check_policy(parse_export_type(&export_type)?, &crs)
                .await?;
            print_json(&decision)?;
        }
        Command::Export {
            scene_id,
            export_type,
            crs,
        } => {
            let outcome = client
                .exports()
                .request_export(&SceneId::from(scene_id), parse_export_type(&export_type)?, &crs)
                .await?;
            print_json(&outcome.response)?;
            if let Some(artifact) = outcome.artifact() {
                println!("artifact: {} ({})", artifact.id, artifact.artifact_type);
            }
            if let Some(url) = outcome.url {
                println!("url: {}", url.url);
            }
        }
        Command::Latest {
            scene_id,
            artifact_type,
        } => {
            let (artifact, url) = client
                .resolver()
                .latest_with_url(&SceneId::from(scene_id), &artifact_type)
                .await?;
            print_json(&artifact)?;
            println!("url: {}", url.url);
        }
        Command::Url {
            artifact_id,
            filename,
            attachment,
        } => {
            let artifact_id = ArtifactId::from(artifact_id);
            let entry = if filename.is_some() || attachment {
                let options = DownloadOptions {
                    filename,
                    as_attachment: attachment,
                };
                client.remote().artifact_url_with(&artifact_id, &options).await?
            } else {
                client.url_cache().resolve(&artifact_id).await?
            };
            print_json(&entry)?;
        }
        Command::RefreshUrl { artifact_id } => {
            let entry = client
                .url_cache()
                .force_refresh(&ArtifactId::from(artifact_id))
                .await?;
            print_json(&entry)?;
        }
        Command::Meta { artifact_id } => {
            let meta = client
                .url_cache()
                .head_meta(&ArtifactId::from(artifact_id))
                .await?;
            print_json(&meta)?;
        }
        Command::Open { artifact_id } => match client.open_artifact(&ArtifactId::from(artifact_id)).await? {
            Presentation::Open { url } => println!("open: {}", url.url),
            Presentation::Preview { preview, .. } => {
                println!("{}", preview.text());
                if let ArtifactPreview::Raw { truncated: true, .. } = preview {
                    println!("... (truncated)");
                }
            }
        },
        Command::Csv(csv) => {
            let path = match csv {
                CsvCommand::Scenes => client.export_scenes_csv().await?,
                CsvCommand::Runs => client.export_runs_csv().await?,
                CsvCommand::Metrics { scene_id } => {
                    client
                        .export_scene_metrics_csv(&SceneId::from(scene_id))
                        .await?
                }
                CsvCommand::Artifact { artifact_id } => {
                    client
                        .export_artifact_csv(&ArtifactId::from(artifact_id))
                        .await?
                }
                CsvCommand::Listing { scene_id } => {
                    client
                        .export_artifact_listing_csv(&SceneId::from(scene_id))
                        .await?
                }
            };
            println!("wrote {}", path.display());
        }
        Command::DeleteArtifact { artifact_id } => {
            client
                .delete_artifact(&ArtifactId::from(artifact_id))
                .await?;
            println!("deleted");
        }
        Command::DeleteScene { scene_id } => {
            client.delete_scene(&SceneId::from(scene_id)).await?;
            println!("deleted");
        }
        Command::Cleanup => {
            let response = client.admin_cleanup().await?;
            print_json(&response)?;
        }
    }

    Ok(())
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_page<T: serde::Serialize, F>(view: &PageView<T, F>) -> Result<()> {
    print_json(&view.items)?;
    let shown = view.items.len() as u64;
    let first = if shown == 0 { 0 } else { view.offset + 1 };
    println!(
        "showing {first}-{} of {}{}{}",
        view.offset + shown,
        view.total,
        if view.has_prev { " [prev]" } else { "" },
        if view.has_next { " [next]" } else { "" },
    );
    Ok(())
}

fn parse_overrides(raw: &[String]) -> Result<Map<String, Value>> {
    let mut overrides = Map::new();
    for entry in raw {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| anyhow!("override '{entry}' must look like key=value"))?;
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        overrides.insert(key.trim().to_string(), value);
    }
    Ok(overrides)
}

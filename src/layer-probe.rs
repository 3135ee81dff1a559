use layer_probe::config::{Command, Config, Opts};
use serde::Serialize;
use structopt::StructOpt;
use tracing::info;

#[derive(Serialize)]
struct Digests {
    repository: String,
    digests: Vec<String>,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout only carries the JSON result
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let opts = Opts::from_args();
    let config = Config::from(&opts);

    // Read the environment. Note that this tries a KubeConfig file first, then
    // falls back on an in-cluster configuration.
    let kubeconfig = kube::Config::infer().await?;
    let client = kube::Client::try_from(kubeconfig)?;
    let registry = config.registry(client);
    info!(architecture = %registry.architecture(), "Starting layer-probe");

    match opts.command {
        Command::Digests { image } => {
            let (repository, digests, _) = registry.layers_digests(&image).await?;
            print_json(&Digests {
                repository,
                digests,
            })
        }
        Command::ToolkitRelease { image } => {
            let layer = registry.last_layer(&image).await?;
            let entry = registry.extract_toolkit_release(layer).await?;
            print_json(&entry)
        }
        Command::DtkImage { release_image } => {
            let layer = registry.last_layer(&release_image).await?;
            print_json(&registry.release_manifests(layer).await?)
        }
        Command::MachineOs { release_image } => {
            let layer = registry.last_layer(&release_image).await?;
            print_json(&registry.release_image_machine_os_config(layer).await?)
        }
        Command::DtkEntry { release_image } => {
            print_json(&registry.driver_toolkit_entry(&release_image).await?)
        }
    }
}

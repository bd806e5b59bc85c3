use argh::FromArgs;
use hemalyzer::{
    AnalysisView, ClientConfig, ClientError, HttpAnalysisService, RenderOptions, ViewState,
};
use std::path::PathBuf;

#[derive(FromArgs)]
/// Hemalyzer client for analyzing blood smear images
struct ClientArgs {
    /// base URL of the analysis service (defaults to $HEMALYZER_BASE_URL or http://localhost:5000)
    #[argh(option, short = 'u')]
    base_url: Option<String>,

    /// command to execute: "analyze", "health" or "models"
    #[argh(subcommand)]
    command: ClientCommands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum ClientCommands {
    Analyze(AnalyzeCommand),
    Health(HealthCommand),
    Models(ModelsCommand),
}

#[derive(FromArgs)]
/// Upload an image and print the analysis
#[argh(subcommand, name = "analyze")]
struct AnalyzeCommand {
    /// the path to the blood smear image
    #[argh(option, short = 'i')]
    image_path: PathBuf,

    /// show the full probability breakdown for each WBC
    #[argh(switch, short = 'd')]
    details: bool,

    /// write the annotated image to this path
    #[argh(option, short = 's')]
    save_annotated: Option<PathBuf>,
}

#[derive(FromArgs)]
/// Check that the service is up
#[argh(subcommand, name = "health")]
struct HealthCommand {}

#[derive(FromArgs)]
/// List the classes the service's models know
#[argh(subcommand, name = "models")]
struct ModelsCommand {}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: ClientArgs = argh::from_env();

    let mut config = ClientConfig::from_env()?;
    if let Some(base_url) = &args.base_url {
        config = config.with_base_url(base_url)?;
    }
    let service = HttpAnalysisService::new(config)?;

    match args.command {
        ClientCommands::Analyze(cmd) => analyze(service, cmd)?,
        ClientCommands::Health(_) => {
            let health = service.health().map_err(ClientError::from)?;
            println!("Result: {}", serde_json::to_string_pretty(&health)?);
        }
        ClientCommands::Models(_) => {
            let info = service.models_info().map_err(ClientError::from)?;
            println!("Result: {}", serde_json::to_string_pretty(&info)?);
        }
    }

    Ok(())
}

fn analyze(service: HttpAnalysisService, cmd: AnalyzeCommand) -> Result<(), ClientError> {
    let bytes = std::fs::read(&cmd.image_path).map_err(|source| ClientError::ReadImage {
        path: cmd.image_path.clone(),
        source,
    })?;
    let file_name = cmd
        .image_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());

    let mut view = AnalysisView::new(service);
    view.select_image(file_name, bytes);
    view.submit()?;

    println!("{}", view.render(RenderOptions::default()));
    view.wait(None);

    print!(
        "{}",
        view.render(RenderOptions {
            show_probabilities: cmd.details,
        })
    );

    if let (Some(path), ViewState::Succeeded { result, .. }) = (&cmd.save_annotated, view.state()) {
        match &result.annotated_image {
            Some(image) => {
                std::fs::write(path, image).map_err(|source| ClientError::WriteOutput {
                    path: path.clone(),
                    source,
                })?;
                println!("Saved annotated image to {}", path.display());
            }
            None => log::warn!("Service returned no annotated image"),
        }
    }

    if let Some(error) = view.state().error() {
        log::error!("Analysis failed: {}", error);
        std::process::exit(1);
    }

    Ok(())
}

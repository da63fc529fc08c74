use crate::{
    cli::DownloadOpts,
    config::AppConfig,
    error::{AppError, Result},
    output::{OutputManager, write_export},
    progress::{SegmentProgress, spinner},
};
use bilibili_api::{
    BiliClient, Downloader, HttpTransport, ResourceIdentifier, default_client, load_cookie_file,
};
use danmaku::ExportFormat;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Effective settings of one download: configuration overridden by flags.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadRequest {
    pub id: ResourceIdentifier,
    pub output_dir: PathBuf,
    pub format: ExportFormat,
    pub max_segments: u32,
    pub cookie_file: PathBuf,
    pub concurrency: usize,
}

impl DownloadRequest {
    pub fn new(id: ResourceIdentifier, config: &AppConfig, opts: &DownloadOpts) -> Self {
        Self {
            id,
            output_dir: opts
                .output_dir
                .clone()
                .unwrap_or_else(|| config.output_dir.clone()),
            format: opts.format.map(Into::into).unwrap_or(config.format),
            max_segments: opts.max_segments.unwrap_or(config.max_segments),
            cookie_file: opts
                .cookie_file
                .clone()
                .unwrap_or_else(|| config.cookie_file.clone()),
            concurrency: opts
                .concurrency
                .map(|n| n as usize)
                .unwrap_or(config.concurrency),
        }
    }
}

pub fn parse_id(input: &str) -> Result<ResourceIdentifier> {
    input.parse().map_err(|_| {
        AppError::InvalidInput(format!(
            "'{}' is not an av, BV, ep, ss or md identifier",
            input.trim()
        ))
    })
}

pub struct CommandExecutor {
    config: AppConfig,
    output: OutputManager,
    show_progress: bool,
}

impl CommandExecutor {
    pub fn new(config: AppConfig, show_progress: bool) -> Self {
        Self {
            config,
            output: OutputManager::new(std::io::stdout().is_terminal()),
            show_progress,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    async fn transport(&self, cookie_file: &Path) -> Result<Arc<dyn HttpTransport>> {
        let mut client = BiliClient::new(default_client(self.config.timeout())?);
        if let Some(user_agent) = &self.config.user_agent {
            client.set_user_agent(user_agent)?;
        }
        match load_cookie_file(cookie_file).await? {
            Some(cookie) => {
                client.set_cookie(&cookie)?;
                info!(path = %cookie_file.display(), "Using cookie file");
            }
            None => info!("No cookie found, requests are anonymous"),
        }
        Ok(Arc::new(client))
    }

    pub async fn download(&self, request: &DownloadRequest, json: bool) -> Result<()> {
        debug!(?request, "Starting download");
        let transport = self.transport(&request.cookie_file).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        let downloader = Downloader::new(transport)
            .with_max_segments(request.max_segments)
            .with_concurrency(request.concurrency)
            .with_events(tx);
        let visible = self.show_progress && !json;

        let work = async move {
            let pb = spinner(format!("Resolving {}...", request.id), visible);
            let targets = downloader.resolve(&request.id).await;
            pb.finish_and_clear();
            let targets = targets?;

            let progress = SegmentProgress::start(rx, visible);
            let report = downloader.fetch(&request.id, targets, request.format).await;
            // Closes the event channel so the bar sees every queued event.
            drop(downloader);
            progress.finish().await;
            Ok::<_, AppError>(report?)
        };
        let mut work = Box::pin(work);

        // Nothing is written until every fetch has settled, so dropping the
        // work here leaves no file behind.
        let report = tokio::select! {
            report = &mut work => report?,
            _ = tokio::signal::ctrl_c() => {
                // Aborts in-flight fetches and clears the progress bars.
                drop(work);
                return Err(AppError::Interrupted);
            }
        };

        let bytes = report.render()?;
        let path = write_export(&request.output_dir, &report.document.file_name(), &bytes).await?;
        info!(path = %path.display(), records = report.total_records(), "Export written");

        if json {
            println!("{}", self.output.summary_json(&report, &path)?);
        } else {
            print!("{}", self.output.format_summary(&report, &path));
        }
        Ok(())
    }

    pub async fn info(&self, id: &str, cookie_file: Option<&Path>, json: bool) -> Result<()> {
        let id = parse_id(id)?;
        let cookie_file = cookie_file.unwrap_or(&self.config.cookie_file);
        let downloader = Downloader::new(self.transport(cookie_file).await?);

        let pb = spinner(format!("Resolving {id}..."), self.show_progress && !json);
        let targets = downloader.resolve(&id).await;
        pb.finish_and_clear();
        let targets = targets?;

        if json {
            println!("{}", self.output.parts_json(&id, &targets)?);
        } else {
            print!("{}", self.output.format_parts(&id, &targets));
        }
        Ok(())
    }

    #[cfg(feature = "interactive")]
    pub async fn interactive(&self) -> Result<()> {
        use inquire::{Select, Text, validator::Validation};

        println!("Enter an identifier such as BV17x411w7KC, av170001, ep508404, ss28770 or md28229051.");
        loop {
            let input = Text::new("Identifier (q to quit):")
                .with_validator(|s: &str| {
                    let s = s.trim();
                    if s.eq_ignore_ascii_case("q") || s.parse::<ResourceIdentifier>().is_ok() {
                        Ok(Validation::Valid)
                    } else {
                        Ok(Validation::Invalid(
                            "expected av…, BV…, ep…, ss… or md…".into(),
                        ))
                    }
                })
                .prompt()?;
            let input = input.trim();
            if input.eq_ignore_ascii_case("q") {
                break;
            }
            let id = parse_id(input)?;

            let start = ExportFormat::ALL
                .iter()
                .position(|f| *f == self.config.format)
                .unwrap_or(0);
            let format = Select::new("Format:", ExportFormat::ALL.to_vec())
                .with_starting_cursor(start)
                .prompt()?;

            let default_dir = self
                .config
                .output_dir
                .join(chrono::Local::now().format("%Y%m%d_%H%M%S").to_string());
            let output_dir = Text::new("Output directory:")
                .with_default(&default_dir.display().to_string())
                .prompt()?;
            let cookie_file = Text::new("Cookie file:")
                .with_default(&self.config.cookie_file.display().to_string())
                .prompt()?;

            let opts = DownloadOpts {
                output_dir: Some(PathBuf::from(output_dir.trim())),
                cookie_file: Some(PathBuf::from(cookie_file.trim())),
                ..DownloadOpts::default()
            };
            let mut request = DownloadRequest::new(id, &self.config, &opts);
            request.format = format;

            // A failed download does not end the session.
            if let Err(e) = self.download(&request, false).await {
                eprintln!("{}", self.output.format_error(&e));
            }
        }
        Ok(())
    }

    #[cfg(not(feature = "interactive"))]
    pub async fn interactive(&self) -> Result<()> {
        Err(AppError::InvalidInput(
            "interactive mode is not available in this build, use `dmdl download <ID>`"
                .to_string(),
        ))
    }
}

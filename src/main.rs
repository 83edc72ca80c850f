use std::{
    fs,
    path::PathBuf,
    process::ExitCode,
};
use anyhow::Context;
use async_trait::async_trait;
use clap::{
    Parser, Subcommand
};
use env_logger::Env;
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use fanout::{
    config::{self, Ceiling, Config},
    job,
    mail::{self, Email, Envelope, MailError, MailTransport, MailerSend, SendReceipt},
    runner::{Runner, WorkerCommand},
};

// CLI
#[derive(Parser, Debug)]
#[command(name = "fanout")]
#[command(version = "0.1")]
#[command(about = "Runs an external worker once per job input with a bounded \
                   number of concurrent processes, and mails a message to a \
                   list of recipients.",
          long_about = None
)]
struct Cli {
    /// TOML config file, defaults to `./fanout.toml` then `~/.fanout/config.toml`
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the worker once for every job input
    Run {
        /// JSON file with the job inputs
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Record field holding the job input
        #[arg(short, long)]
        field: Option<String>,

        /// Worker count, or `auto` for one per cpu
        #[arg(short = 'w', long)]
        max_workers: Option<Ceiling>,

        /// Per-job deadline in seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Write the per-job report as JSON
        #[arg(short, long)]
        report: Option<PathBuf>,

        /// Exit with success even if some jobs failed
        #[arg(long, action)]
        allow_failures: bool,

        /// Worker program and its leading arguments
        #[arg(last = true)]
        worker: Vec<String>,
    },

    /// Send a message to every recipient
    Mail {
        /// Message body
        #[arg(short, long)]
        message: Option<String>,

        /// JSON file with `{name, email}` records
        #[arg(short, long)]
        recipients: Option<PathBuf>,

        #[arg(short, long)]
        subject: Option<String>,

        /// Print the request body instead of sending it
        #[arg(long, action)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .init();
    config::load_dotenv();
    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            input,
            field,
            max_workers,
            timeout,
            report,
            allow_failures,
            worker,
        } => {
            let runner_config = &mut config.runner;
            if let Some(input) = input {
                runner_config.input_file = input;
            }
            if let Some(field) = field {
                runner_config.input_field = field;
            }
            if let Some(max_workers) = max_workers {
                runner_config.max_workers = max_workers;
            }
            if timeout.is_some() {
                runner_config.timeout_secs = timeout;
            }
            let mut runner = Runner::from_config(runner_config);
            if let Some((program, args)) = worker.split_first() {
                runner = Runner::new(
                    WorkerCommand::new(program.clone(), args.to_vec()),
                    runner.concurrency(),
                )
                .with_timeout(runner_config.timeout());
            }
            info!(
                "Worker ceiling: `{}` => `{}` processes",
                runner_config.max_workers,
                runner.concurrency()
            );

            let inputs = job::load_inputs(
                &runner_config.input_file,
                &runner_config.input_field
            );

            let cancel = CancellationToken::new();
            let on_ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, cancelling the remaining jobs.");
                    on_ctrl_c.cancel();
                }
            });

            let run_report = runner.run(inputs, cancel).await;
            for failed in run_report.failed() {
                warn!("Failed job `{}`: `{:?}`", failed.input, failed.outcome);
            }
            if let Some(report_path) = report {
                fs::write(
                    &report_path,
                    serde_json::to_string_pretty(&run_report)?
                )
                .with_context(|| format!("Failed to write report to `{}`", report_path.display()))?;
                info!("Report saved to `{}`", report_path.display());
            }
            println!("{}", run_report.summary());

            if run_report.is_success() || allow_failures {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        },

        Commands::Mail {
            message,
            recipients,
            subject,
            dry_run,
        } => {
            let mail_config = &mut config.mail;
            if let Some(recipients) = recipients {
                mail_config.recipients_file = recipients;
            }
            if let Some(subject) = subject {
                mail_config.subject = subject;
            }
            // nothing to send is not an error, and needs no api key
            let Some(to) = mail::pending_recipients(
                &mail_config.recipients_file,
                message.as_deref(),
            ) else {
                return Ok(ExitCode::SUCCESS)
            };
            let envelope = Envelope::from_config(mail_config)?;
            let email = Email::compose(&envelope, to, message.as_deref().unwrap_or_default());
            let transport: Box<dyn MailTransport> = if dry_run {
                Box::new(PrintTransport)
            } else {
                Box::new(MailerSend::from_config(mail_config)?)
            };
            let receipt = mail::deliver(transport.as_ref(), &email).await?;
            println!("{}", serde_json::to_string(&receipt)?);
            Ok(ExitCode::SUCCESS)
        },
    }
}

// `--dry-run`: show what would be posted
struct PrintTransport;

#[async_trait]
impl MailTransport for PrintTransport {
    async fn send(&self, email: &Email) -> Result<SendReceipt, MailError> {
        match serde_json::to_string_pretty(email) {
            Ok(body) => println!("{body}"),

            Err(e) => warn!("Failed to render the mail body: `{e:?}`"),
        }
        Ok(SendReceipt {
            status: 0,
            message_id: None,
        })
    }
}

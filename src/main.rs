use clap::{Args, Parser, Subcommand};
use qip_autofill::config::AppConfig;
use qip_autofill::error::AppError;
use qip_autofill::telemetry;
use qip_autofill::workflows::approval::ReturnRule;
use qip_autofill::workflows::{ApplicationRunner, RunOptions, RunnerError};
use serde::Serialize;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "qip-autofill",
    about = "Fill, submit, and approve investment project applications against the portal API",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit every step of an application (a new one unless an id is given)
    Run(RunArgs),
    /// Print the ordered step list for the configured project type
    Steps(ActingArgs),
    /// Submit a single step of an existing application
    Step(StepArgs),
    /// Drive the approval flow of a submitted application
    Approve(ApproveArgs),
    /// List investor accounts that have a live session in the session store
    Accounts(AccountsArgs),
}

#[derive(Args, Debug, Default)]
struct ActingArgs {
    /// Investor user to act as (defaults to QIP_INVESTOR_USER_ID)
    #[arg(long)]
    acting_user: Option<String>,
}

#[derive(Args, Debug, Default)]
struct ReturnArgs {
    /// Stage at which the flow is sent back once
    #[arg(long, requires = "return_to")]
    return_at: Option<u32>,
    /// Stage the flow is sent back to
    #[arg(long, requires = "return_at")]
    return_to: Option<u32>,
}

impl ReturnArgs {
    fn rule(&self) -> Option<ReturnRule> {
        Some(ReturnRule {
            trigger: self.return_at?,
            target: self.return_to?,
        })
    }
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Existing application id; a new application is created when omitted
    #[arg(long)]
    application_id: Option<String>,
    /// Sign, pay, wait for the invoice, and run the approval flow after the steps
    #[arg(long)]
    finalize: bool,
    #[command(flatten)]
    acting: ActingArgs,
    #[command(flatten)]
    returns: ReturnArgs,
}

#[derive(Args, Debug)]
struct StepArgs {
    #[arg(long)]
    application_id: String,
    /// Step code, e.g. general_info
    #[arg(long)]
    step: String,
    #[command(flatten)]
    acting: ActingArgs,
}

#[derive(Args, Debug)]
struct ApproveArgs {
    #[arg(long)]
    application_id: String,
    #[command(flatten)]
    returns: ReturnArgs,
}

#[derive(Args, Debug)]
struct AccountsArgs {
    /// Case-insensitive filter on name, email, or phone
    #[arg(long)]
    search: Option<String>,
    #[arg(long, default_value_t = 20)]
    limit: usize,
    #[arg(long, default_value_t = 0)]
    offset: usize,
}

#[derive(Debug, Serialize)]
struct StepResult<'a> {
    application_id: &'a str,
    step: &'a str,
    ok: bool,
}

fn main() {
    if let Err(err) = run_cli() {
        eprintln!("application error: {err}");
        if err.is_remote() {
            eprintln!("rerun with APP_LOG_LEVEL=debug to see the portal requests");
        }
        std::process::exit(1);
    }
}

fn run_cli() -> Result<(), AppError> {
    let cli = Cli::parse();
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    let runner = ApplicationRunner::from_config(&config)?;
    info!(project_type = %config.api.project_type, "portal client ready");

    match cli.command {
        Command::Run(args) => {
            let options = RunOptions {
                acting_user: args.acting.acting_user,
                finalize: args.finalize,
                return_rule: args.returns.rule(),
            };
            let report = runner.run(args.application_id.as_deref(), &options)?;
            print_json(&report)
        }
        Command::Steps(args) => {
            let steps = runner
                .steps()
                .list_steps(args.acting_user.as_deref())
                .map_err(RunnerError::from)?;
            print_json(&steps)
        }
        Command::Step(args) => {
            let ok = runner
                .steps()
                .submit_step(&args.application_id, &args.step, args.acting.acting_user.as_deref())
                .map_err(RunnerError::from)?;
            print_json(&StepResult {
                application_id: &args.application_id,
                step: &args.step,
                ok,
            })
        }
        Command::Approve(args) => {
            let report = runner
                .approval()
                .run(&args.application_id, args.returns.rule())
                .map_err(RunnerError::from)?;
            print_json(&report)
        }
        Command::Accounts(args) => {
            let accounts = runner
                .session_store()
                .investor_accounts(args.search.as_deref(), args.limit, args.offset)
                .map_err(RunnerError::from)?;
            print_json(&accounts)
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), AppError> {
    let rendered = serde_json::to_string_pretty(value).map_err(std::io::Error::from)?;
    println!("{rendered}");
    Ok(())
}

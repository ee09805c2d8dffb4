//! `bezz`: command-line client for the Bezz brand strategy service.
//!
//! Usage:
//!     bezz login --email ana@example.com
//!     bezz submit --company "Acme Coffee" --sector "Food" --tone Friendly \
//!         --audience "Urban commuters who want quality coffee"
//!     bezz watch

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use secrecy::SecretString;

use bezz_client::api::ProfileUpdate;
use bezz_client::jobs::progress::estimate_job;
use bezz_client::jobs::{Job, JobId, TrackerEvent};
use bezz_client::session::{Plan, SignOutReason, SignUpOutcome};
use bezz_client::wizard::{Field, FormWizard};
use bezz_client::{logging, AppContext, AppError, ClientConfig};

#[derive(Parser, Debug)]
#[command(name = "bezz", version, about = "Client for the Bezz brand strategy service")]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true, env = "BEZZ_CONFIG")]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in with email and password
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "BEZZ_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account
    Signup {
        #[arg(long)]
        email: String,
        #[arg(long, env = "BEZZ_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long)]
        name: String,
    },
    /// Request a password reset email
    ResetPassword {
        #[arg(long)]
        email: String,
    },
    /// Sign out and forget the stored session
    Logout,
    /// Show the signed-in user, credit balance and subscription
    Whoami,
    /// Update the display name or photo URL
    Profile {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        photo_url: Option<String>,
    },
    /// List recent briefs
    Briefs,
    /// Follow pending briefs until they settle
    Watch,
    /// Submit a new brief
    Submit {
        #[arg(long)]
        company: String,
        #[arg(long)]
        sector: String,
        #[arg(long)]
        tone: String,
        #[arg(long, default_value = "en")]
        language: String,
        #[arg(long)]
        audience: String,
        #[arg(long)]
        info: Option<String>,
        /// Keep watching until the brief settles
        #[arg(long)]
        wait: bool,
    },
    /// Retry a failed brief
    Retry { id: String },
    /// Delete a brief
    Delete { id: String },
    /// Start a checkout for a credit plan (starter, pro, enterprise)
    Checkout {
        #[arg(value_parser = parse_plan)]
        plan: Plan,
    },
    /// Re-sync the profile after completing a checkout
    Sync,
}

fn parse_plan(value: &str) -> Result<Plan, String> {
    Plan::parse(value).ok_or_else(|| format!("unknown plan '{value}'"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose)?;

    let mut config =
        ClientConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    config.log_query_params |= cli.verbose;
    let ctx = AppContext::init(config)
        .await
        .context("Failed to initialize client")?;

    let result = run(&ctx, cli.command).await;
    ctx.teardown();

    result.map_err(|e| match e.downcast::<AppError>() {
        Ok(app) => {
            let presentation = app.to_presentation();
            match presentation.action {
                Some(action) => anyhow::anyhow!(
                    "{}: {} ({})",
                    presentation.title,
                    presentation.message,
                    action
                ),
                None => anyhow::anyhow!("{}: {}", presentation.title, presentation.message),
            }
        }
        Err(other) => other,
    })
}

async fn run(ctx: &AppContext, command: Command) -> Result<()> {
    match command {
        Command::Login { email, password } => {
            let snapshot = ctx.session.sign_in(&email, &SecretString::from(password)).await?;
            println!(
                "Signed in as {} ({} credits)",
                snapshot.email, snapshot.credit_balance
            );
        }
        Command::Signup {
            email,
            password,
            name,
        } => match ctx
            .session
            .sign_up(&email, &SecretString::from(password), &name)
            .await?
        {
            SignUpOutcome::SignedIn(snapshot) => {
                println!("Account created; signed in as {}", snapshot.email)
            }
            SignUpOutcome::PendingSignIn { email } => {
                println!("Account created for {email}; sign in to continue")
            }
        },
        Command::ResetPassword { email } => {
            ctx.session.reset_password(&email).await?;
            println!("If {email} has an account, a reset link is on its way");
        }
        Command::Logout => {
            ctx.session.sign_out(SignOutReason::UserRequested).await?;
            println!("Signed out");
        }
        Command::Whoami => {
            require_session(ctx)?;
            let snapshot = ctx.session.sync_profile().await?;
            let plan = snapshot
                .subscription_plan
                .map(|p| p.to_string())
                .unwrap_or_else(|| "none".to_string());
            println!("{} <{}>", snapshot.display_name.as_deref().unwrap_or("-"), snapshot.email);
            println!("credits: {}  plan: {}", snapshot.credit_balance, plan);

            let subscription = ctx.api.get_subscription().await;
            if let Some(subscription) = ctx.session.intercept(subscription).await? {
                let renewal = if subscription.cancel_at_period_end {
                    "ends"
                } else {
                    "renews"
                };
                println!(
                    "subscription: {:?}, {} {}",
                    subscription.status,
                    renewal,
                    subscription.current_period_end.format("%Y-%m-%d")
                );
            }
        }
        Command::Profile { name, photo_url } => {
            require_session(ctx)?;
            let update = ProfileUpdate {
                display_name: name,
                photo_url,
            };
            let profile = ctx.api.update_profile(&update).await;
            let profile = ctx.session.intercept(profile).await?;
            let snapshot = ctx.session.apply_profile(profile).await?;
            println!("Profile updated for {}", snapshot.email);
        }
        Command::Briefs => {
            require_session(ctx)?;
            let jobs = ctx.tracker.load().await?;
            if jobs.is_empty() {
                println!("No briefs yet");
            }
            for job in &jobs {
                print_job(job, ctx.config.sla());
            }
            let stats = ctx.tracker.stats();
            println!(
                "{} total, {} in progress, {} completed, {} failed",
                stats.total, stats.in_progress, stats.completed, stats.failed
            );
        }
        Command::Watch => {
            require_session(ctx)?;
            ctx.tracker.load().await?;
            watch(ctx).await?;
        }
        Command::Submit {
            company,
            sector,
            tone,
            language,
            audience,
            info,
            wait,
        } => {
            require_session(ctx)?;
            let mut wizard = FormWizard::new();
            wizard.set_answer(Field::CompanyName, &company)?;
            wizard.set_answer(Field::Sector, &sector)?;
            wizard.set_answer(Field::Tone, &tone)?;
            wizard.set_answer(Field::Language, &language)?;
            wizard.set_answer(Field::TargetAudience, &audience)?;
            if let Some(info) = info {
                wizard.set_answer(Field::AdditionalInfo, &info)?;
            }
            while !wizard.is_on_last_step() {
                wizard.next()?;
            }
            wizard
                .request_submit()
                .map_err(AppError::SubmissionBlocked)?;

            let id = ctx.submissions.submit(&mut wizard).await?;
            println!("Brief {} submitted", id);
            if wait {
                watch(ctx).await?;
            }
        }
        Command::Retry { id } => {
            require_session(ctx)?;
            let id = JobId::from(id);
            ctx.retries.retry(&id).await?;
            println!("Brief {} is processing again", id);
        }
        Command::Delete { id } => {
            require_session(ctx)?;
            let id = JobId::from(id);
            ctx.tracker.delete_job(&id).await?;
            println!("Brief {} deleted", id);
        }
        Command::Checkout { plan } => {
            require_session(ctx)?;
            let checkout = ctx.api.create_checkout_session(plan).await;
            let checkout = ctx.session.intercept(checkout).await?;
            println!(
                "Open {} to buy {} credits ({} plan), then run `bezz sync`",
                checkout.checkout_url,
                plan.credits(),
                plan
            );
        }
        Command::Sync => {
            require_session(ctx)?;
            let snapshot = ctx.session.resume_after_checkout().await?;
            println!("credits: {}", snapshot.credit_balance);
        }
    }
    Ok(())
}

fn require_session(ctx: &AppContext) -> Result<()> {
    if !ctx.session.is_authenticated() {
        bail!(AppError::NotAuthenticated);
    }
    Ok(())
}

fn print_job(job: &Job, sla: Duration) {
    let progress = if job.is_terminal() {
        String::new()
    } else {
        let report = estimate_job(job, Utc::now(), sla);
        format!(
            "  {}% ({} left)",
            report.estimate.percent,
            report.estimate.remaining_label()
        )
    };
    println!(
        "{}  {:<18}  {}{}",
        job.id,
        job.status.as_str(),
        job.payload.company_name,
        progress
    );
}

/// Prints status changes and progress until nothing is pending.
async fn watch(ctx: &AppContext) -> Result<()> {
    if ctx.tracker.pending_ids().is_empty() {
        println!("Nothing pending");
        return Ok(());
    }

    let lifetime = ctx.session.lifetime();
    let mut subscription = ctx.tracker.subscribe("cli-watch");
    loop {
        let event = tokio::select! {
            _ = lifetime.cancelled() => bail!(AppError::SessionExpired),
            event = subscription.recv() => event,
        };
        let Some(event) = event else { break };

        match event {
            TrackerEvent::StatusChanged { job_id, from, to } => {
                println!("{}: {} -> {}", job_id.short(), from, to);
            }
            TrackerEvent::Progress(reports) => {
                for report in reports {
                    eprint!(
                        "\r{}: {:>3}% ({} left)",
                        report.job_id.short(),
                        report.estimate.percent,
                        report.estimate.remaining_label()
                    );
                }
            }
            TrackerEvent::Removed(job_id) => println!("{}: removed", job_id.short()),
            TrackerEvent::Tracked(_) => {}
            TrackerEvent::Idle => {
                eprintln!();
                println!("All briefs settled");
                break;
            }
        }
    }
    Ok(())
}

mod app;
mod board;
mod cache;
mod config;
mod db;
mod error;
mod favorites;
mod jobs;
mod logging;
mod models;
mod optimistic;
mod pager;
mod profile;
mod rest;
mod session;
mod store;
mod tracker;
mod tui;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use app::App;
use board::ApplicationBoard;
use config::Config;
use favorites::FavoriteSet;
use jobs::JobForm;
use models::{ApplicationStatus, Job, NOT_AVAILABLE};
use pager::{PageCursor, PageLabel};
use profile::ProfileForm;

#[derive(Parser)]
#[command(name = "coopscout")]
#[command(about = "Co-op job board - browse listings, keep favorites, track applications")]
struct Cli {
    /// Config file (default: platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database and write a default config
    Init,

    /// Sign in; favorites saved on this machine are merged into your account
    Login {
        /// Account email
        email: String,

        /// Password (prompted when omitted on the hosted backend)
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Sign out
    Logout,

    /// Show who is signed in
    Whoami,

    /// List active jobs, newest first
    List {
        /// Page number
        #[arg(short, long, default_value = "1")]
        page: usize,
    },

    /// Show job details
    Show {
        /// Job ID
        job: String,
    },

    /// Toggle a job as favorite
    Fav {
        /// Job ID
        job: String,
    },

    /// List favorite jobs
    Favorites,

    /// Start tracking an application for a job
    Track {
        /// Job ID
        job: String,

        /// Initial status (saved, applied)
        #[arg(short, long, default_value = "saved")]
        status: ApplicationStatus,
    },

    /// Change an application's status
    Status {
        /// Application ID
        application: String,

        /// New status (saved, applied, interview, offer, rejected)
        status: ApplicationStatus,
    },

    /// Replace an application's notes (empty clears them)
    Notes {
        /// Application ID
        application: String,

        /// Note text
        text: Vec<String>,
    },

    /// Set or clear an interview date
    Interview {
        /// Application ID
        application: String,

        /// When, as YYYY-MM-DD, "YYYY-MM-DD HH:MM" (UTC) or RFC 3339
        #[arg(long, conflicts_with = "clear")]
        at: Option<String>,

        /// Remove the interview date
        #[arg(long)]
        clear: bool,
    },

    /// Stop tracking an application
    Untrack {
        /// Application ID
        application: String,
    },

    /// List tracked applications
    Apps {
        /// Filter by status (saved, applied, interview, offer, rejected)
        #[arg(short, long)]
        status: Option<ApplicationStatus>,
    },

    /// Add a job found elsewhere and track it
    AddJob {
        /// Job title
        #[arg(long)]
        title: String,

        /// Company name
        #[arg(long)]
        company: String,

        #[arg(long, default_value = "")]
        location: String,

        /// Application deadline (YYYY-MM-DD)
        #[arg(long, default_value = "")]
        deadline: String,

        #[arg(long, default_value = "")]
        compensation: String,

        /// Targeted major (default: your profile major)
        #[arg(long, default_value = "")]
        major: String,

        /// Minimum GPA
        #[arg(long, default_value = "")]
        min_gpa: String,

        #[arg(long, default_value = "")]
        description: String,

        /// Link to the posting
        #[arg(long, default_value = "")]
        link: String,

        /// Status of your application
        #[arg(short, long, default_value = "applied")]
        status: ApplicationStatus,
    },

    /// Import scraped listings from a JSON array file
    Import {
        /// Path to JSON file
        file: PathBuf,
    },

    /// Manage your profile
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },

    /// Browse listings interactively
    Browse,
}

#[derive(Subcommand)]
enum ProfileCommands {
    /// Show your profile
    Show,

    /// Update profile fields; omitted fields keep their value
    Set {
        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        major: Option<String>,

        #[arg(long)]
        gpa: Option<String>,

        /// Graduation year
        #[arg(long)]
        year: Option<String>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    logging::init(&config.logging.level);

    let app = App::build(config)?;

    if let Commands::Init = cli.command {
        println!("{}", app.init()?);
        let path = cli.config.clone().unwrap_or_else(Config::default_path);
        if Config::write_default(&path)? {
            println!("Wrote default config to {}", path.display());
        }
        return Ok(());
    }
    app.ensure_ready()?;

    match cli.command {
        Commands::Init => {}

        Commands::Login { email, password } => {
            let password = match password {
                Some(p) => p,
                None if app.config.backend.kind == config::BackendKind::Supabase => {
                    prompt("Password: ")?
                }
                None => String::new(),
            };
            let signed_in = app.sign_in(&email, &password).await?;
            println!("Signed in as {}", signed_in.user.email);
            match signed_in.migrated {
                Some(0) => {}
                Some(n) => println!("Moved {} favorite(s) from this machine to your account.", n),
                None => println!("Could not move local favorites yet; will retry next sign-in."),
            }
        }

        Commands::Logout => {
            app.sign_out().await?;
            println!("Signed out.");
        }

        Commands::Whoami => match app.session.current_user() {
            Some(user) => println!("{} ({})", user.email, user.id),
            None => println!("Not signed in. Favorites are kept on this machine."),
        },

        Commands::List { page } => {
            let jobs = app.catalog.list_active().await?;
            if jobs.is_empty() {
                println!("No jobs found.");
            } else {
                let mut cursor = PageCursor::new(app.config.listing.page_size, jobs.len());
                if page != 1 && !cursor.go_to(page) {
                    bail!("Page {} is out of range (1-{})", page, cursor.total_pages());
                }
                let favorites = load_favorites(&app).await;
                print_jobs(cursor.window(&jobs), &favorites);

                let (first, last) = cursor.range();
                println!();
                println!(
                    "Showing {}-{} of {}   Pages: {}",
                    first,
                    last,
                    jobs.len(),
                    page_strip(&cursor)
                );
                if cursor.has_prev() {
                    println!("Previous: coopscout list --page {}", cursor.current() - 1);
                }
                if cursor.has_next() {
                    println!("Next: coopscout list --page {}", cursor.current() + 1);
                }
            }
        }

        Commands::Show { job } => {
            match app.catalog.get_job(&job).await? {
                Some(job) => {
                    let favorites = load_favorites(&app).await;
                    println!("Job {}", job.id);
                    println!("Title: {}", job.title);
                    println!("Company: {}", or_na(&job.company));
                    println!("Location: {}", or_na(&job.location));
                    println!("Deadline: {}", or_na(&job.deadline));
                    println!("Compensation: {}", or_na(&job.compensation));
                    println!("Targeted major: {}", or_na(&job.targeted_major));
                    println!("Minimum GPA: {}", or_na(&job.minimum_gpa));
                    if let Some(link) = &job.job_link {
                        println!("Link: {}", link);
                    }
                    if favorites.contains(&job.id) {
                        println!("Favorite: yes");
                    }
                    if let Some(user) = app.session.current_user() {
                        match app.tracker.status_for(&user.id, &job.id).await? {
                            Some(application) => println!(
                                "Application: {} ({})",
                                application.status, application.id
                            ),
                            None => println!("Application: not tracked"),
                        }
                    }
                    if let Some(description) = &job.description {
                        println!("\n--- Description ---\n{}", textwrap::fill(description, 80));
                    }
                }
                None => {
                    println!("Job {} not found.", job);
                }
            }
        }

        Commands::Fav { job } => {
            let actor = app.session.actor();
            let mut favorites = app.favorites.get_favorites(&actor).await?;
            let now_favorite = app
                .favorites
                .toggle_optimistic(&actor, &mut favorites, &job)
                .await?;
            if now_favorite {
                println!("Added job {} to favorites.", job);
            } else {
                println!("Removed job {} from favorites.", job);
            }
        }

        Commands::Favorites => {
            let favorites = app.favorites.get_favorites(&app.session.actor()).await?;
            if favorites.is_empty() {
                println!("No favorites yet.");
            } else {
                let ids: Vec<&String> = favorites.iter().collect();
                let jobs = app.catalog.jobs_by_ids(&ids).await?;
                print_jobs(&jobs, &favorites);
                let missing = favorites.len() - jobs.len();
                if missing > 0 {
                    println!("\n({} favorite(s) are no longer listed)", missing);
                }
            }
        }

        Commands::Track { job, status } => {
            let user = app.session.require_user()?;
            let job = app
                .catalog
                .get_job(&job)
                .await?
                .ok_or_else(|| anyhow!("Job {} not found", job))?;
            let application = app.tracker.track(&user.id, &job.id, status).await?;
            println!(
                "Tracking '{}' as {} (application {})",
                job.title, application.status, application.id
            );
        }

        Commands::Status {
            application,
            status,
        } => {
            let mut board = load_board(&app).await?;
            board
                .change_status(&app.tracker, &application, status)
                .await?;
            match board.get(&application) {
                Some(tracked) => println!(
                    "{} at {} is now {}.",
                    tracked.title(),
                    tracked.company(),
                    status
                ),
                None => println!("Application {} is now {}.", application, status),
            }
        }

        Commands::Notes { application, text } => {
            let mut board = load_board(&app).await?;
            let text = text.join(" ");
            board.edit_notes(&app.tracker, &application, &text).await?;
            let title = board
                .get(&application)
                .map(|t| t.title().to_string())
                .unwrap_or_else(|| format!("application {}", application));
            if text.trim().is_empty() {
                println!("Cleared notes on {}.", title);
            } else {
                println!("Updated notes on {}.", title);
            }
        }

        Commands::Interview {
            application,
            at,
            clear,
        } => {
            let at = match (at, clear) {
                (Some(raw), false) => Some(parse_when(&raw)?),
                (None, true) => None,
                _ => bail!("Give either --at <when> or --clear"),
            };
            let mut board = load_board(&app).await?;
            board.set_interview(&app.tracker, &application, at).await?;
            match at {
                Some(at) => println!("Interview set for {}.", at.format("%Y-%m-%d %H:%M UTC")),
                None => println!("Interview date cleared."),
            }
        }

        Commands::Untrack { application } => {
            let mut board = load_board(&app).await?;
            board.remove(&app.tracker, &application).await?;
            println!("Stopped tracking application {}.", application);
        }

        Commands::Apps { status } => {
            let board = load_board(&app).await?;
            let stats = board.stats();
            println!(
                "Total {}  |  {}",
                stats.total,
                ApplicationStatus::ALL
                    .iter()
                    .map(|s| format!("{} {}", s, stats.count(*s)))
                    .collect::<Vec<_>>()
                    .join("  ")
            );
            println!();

            let apps = board.filtered(status);
            if apps.is_empty() {
                println!("No applications found.");
            } else {
                println!(
                    "{:<12} {:<10} {:<30} {:<20} {:<16} {:<12} {:<10}",
                    "ID", "STATUS", "TITLE", "COMPANY", "LOCATION", "DEADLINE", "UPDATED"
                );
                println!("{}", "-".repeat(116));
                for tracked in apps {
                    println!(
                        "{:<12} {:<10} {:<30} {:<20} {:<16} {:<12} {:<10}",
                        truncate(&tracked.application.id, 12),
                        tracked.application.status,
                        truncate(tracked.title(), 28),
                        truncate(tracked.company(), 18),
                        truncate(tracked.location(), 14),
                        truncate(tracked.deadline(), 12),
                        tracked.application.updated_at.format("%Y-%m-%d")
                    );
                }
            }
        }

        Commands::AddJob {
            title,
            company,
            location,
            deadline,
            compensation,
            major,
            min_gpa,
            description,
            link,
            status,
        } => {
            let user = app.session.require_user()?;
            let form = JobForm {
                title,
                company,
                location,
                deadline,
                compensation,
                targeted_major: major,
                minimum_gpa: min_gpa,
                description,
                job_link: link,
            };
            let profile_major = app.profiles.major(&user.id).await;
            let (job, application) = app
                .catalog
                .add_custom_job(&app.tracker, &user.id, &form, profile_major.as_deref(), status)
                .await?;
            println!(
                "Added job {} '{}' and tracked it as {} (application {})",
                job.id, job.title, application.status, application.id
            );
        }

        Commands::Import { file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let records: Vec<serde_json::Value> = serde_json::from_str(&text)
                .with_context(|| format!("{} is not a JSON array", file.display()))?;
            let total = records.len();
            let imported = app.catalog.import(records).await?;
            println!("Imported {} of {} record(s).", imported, total);
        }

        Commands::Profile { command } => {
            let user = app.session.require_user()?;
            let existing = app.profiles.get(&user.id).await?;
            match command {
                ProfileCommands::Show => match existing {
                    Some(profile) => {
                        println!("Email: {}", profile.email);
                        println!("Name: {}", or_na(&profile.full_name));
                        println!("Major: {}", or_na(&profile.major));
                        println!(
                            "GPA: {}",
                            profile
                                .gpa
                                .map(|g| format!("{:.2}", g))
                                .unwrap_or_else(|| NOT_AVAILABLE.to_string())
                        );
                        println!(
                            "Graduation year: {}",
                            profile
                                .graduation_year
                                .map(|y| y.to_string())
                                .unwrap_or_else(|| NOT_AVAILABLE.to_string())
                        );
                    }
                    None => println!("No profile yet. Use 'coopscout profile set'."),
                },

                ProfileCommands::Set {
                    name,
                    major,
                    gpa,
                    year,
                } => {
                    let mut form = existing
                        .as_ref()
                        .map(ProfileForm::from_profile)
                        .unwrap_or_default();
                    if let Some(name) = name {
                        form.full_name = name;
                    }
                    if let Some(major) = major {
                        form.major = major;
                    }
                    if let Some(gpa) = gpa {
                        form.gpa = gpa;
                    }
                    if let Some(year) = year {
                        form.graduation_year = year;
                    }
                    app.profiles.save(&user, &form).await?;
                    println!("Profile saved.");
                }
            }
        }

        Commands::Browse => {
            tui::run_browse(&app).await?;
        }
    }

    Ok(())
}

/// Favorites are decoration on listings; a read failure shows none.
async fn load_favorites(app: &App) -> FavoriteSet {
    match app.favorites.get_favorites(&app.session.actor()).await {
        Ok(set) => set,
        Err(e) => {
            log::warn!("could not load favorites: {}", e);
            FavoriteSet::new()
        }
    }
}

async fn load_board(app: &App) -> Result<ApplicationBoard> {
    let user = app.session.require_user()?;
    let mut board = ApplicationBoard::new();
    board.reload(&app.tracker, &user.id).await?;
    Ok(board)
}

fn print_jobs(jobs: &[Job], favorites: &FavoriteSet) {
    println!(
        "{:<12} {:<3} {:<30} {:<20} {:<18} {:<12}",
        "ID", "FAV", "TITLE", "COMPANY", "LOCATION", "DEADLINE"
    );
    println!("{}", "-".repeat(98));
    for job in jobs {
        println!(
            "{:<12} {:<3} {:<30} {:<20} {:<18} {:<12}",
            truncate(&job.id, 12),
            if favorites.contains(&job.id) { "*" } else { "" },
            truncate(&job.title, 28),
            truncate(job.company.as_deref().unwrap_or_default(), 18),
            truncate(job.location.as_deref().unwrap_or_default(), 16),
            truncate(job.deadline.as_deref().unwrap_or(NOT_AVAILABLE), 12)
        );
    }
}

fn page_strip(cursor: &PageCursor) -> String {
    cursor
        .labels()
        .into_iter()
        .map(|label| match label {
            PageLabel::Page(n) if n == cursor.current() => format!("[{}]", n),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn or_na(value: &Option<String>) -> &str {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(NOT_AVAILABLE)
}

fn parse_when(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc));
    }
    if let Ok(at) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M") {
        return Ok(at.and_utc());
    }
    if let Ok(day) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(at) = day.and_hms_opt(0, 0, 0) {
            return Ok(at.and_utc());
        }
    }
    Err(anyhow!("Could not read '{}' as a date", raw))
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

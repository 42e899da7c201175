use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use log::warn;

use mail_sorter_client::api::{HttpBackend, SorterApi};
use mail_sorter_client::auth::login::login_url_after_check;
use mail_sorter_client::auth::session_store::SessionCookies;
use mail_sorter_client::config::{Config, load_config, resolve_db_path};
use mail_sorter_client::daemon::{WatchConfig, run_daemon};
use mail_sorter_client::domain::category::CategoryDraft;
use mail_sorter_client::store::{CacheStore, MemoryStore, SqliteStore};
use mail_sorter_client::sync::{BulkAction, BulkOutcome};
use mail_sorter_client::{Dashboard, DashboardOptions};

const DEFAULT_FETCH_LIMIT: u32 = 5;

#[derive(Parser)]
#[command(name = "mail_sorter")]
#[command(about = "Terminal client for the AI email sorter", long_about = None)]
struct Cli {
    /// Keep the email cache in memory only
    #[arg(long, global = true)]
    no_cache: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Follow the live channel and print arrivals until Ctrl-C
    Watch {
        /// Skip the initial fetch and only show what arrives live
        #[arg(long)]
        no_fetch: bool,
    },

    /// Open the Google login page of the backend in a browser
    Login,

    /// Store the backend session in keyring: paste the browser's Cookie
    /// header, or just the session value (read from stdin)
    SetSession,

    /// Forget the stored session cookies
    Logout,

    /// Load the newest emails of every account into the cache
    Fetch {
        #[arg(long, default_value_t = DEFAULT_FETCH_LIMIT)]
        limit: u32,
    },

    #[command(subcommand)]
    Categories(CategoryCmd),

    #[command(subcommand)]
    Accounts(AccountCmd),

    /// List cached emails
    Emails {
        #[arg(long)]
        account: Option<String>,
    },

    /// Show one email as text
    Open { id: String },

    /// Ask the backend to classify an email again
    Recategorize { id: String },

    /// Delete or unsubscribe a batch of cached emails
    Bulk {
        #[arg(value_enum)]
        action: BulkArg,
        #[arg(long = "id", required = true)]
        ids: Vec<String>,
    },
}

#[derive(Subcommand)]
enum CategoryCmd {
    List,
    Add {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    Update {
        id: i64,
        name: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    Delete {
        id: i64,
    },
}

#[derive(Subcommand)]
enum AccountCmd {
    List,
    Disconnect { uid: String },
    DisconnectAll,
}

#[derive(Clone, Copy, ValueEnum)]
enum BulkArg {
    Delete,
    Unsubscribe,
}

impl From<BulkArg> for BulkAction {
    fn from(a: BulkArg) -> Self {
        match a {
            BulkArg::Delete => BulkAction::Delete,
            BulkArg::Unsubscribe => BulkAction::Unsubscribe,
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let cfg = load_config().map_err(|e| anyhow!("Configuration error: {e}"))?;

    match cli.cmd {
        Command::SetSession => {
            eprintln!(
                "Paste the Cookie header or the `{}` value (end with Ctrl-D):",
                cfg.session_cookie_name
            );
            let mut input = String::new();
            std::io::Read::read_to_string(&mut std::io::stdin(), &mut input)?;
            let cookies =
                SessionCookies::parse(&input, &cfg.session_cookie_name, &cfg.csrf_cookie_name);
            if cookies.session.is_none() {
                return Err(anyhow!("no `{}` cookie found in the input", cfg.session_cookie_name));
            }
            if cookies.csrf.is_none() {
                warn!(
                    "no `{}` cookie given; changes may be refused until it is stored",
                    cfg.csrf_cookie_name
                );
            }
            let store = cfg.session_store()?;
            store.save(&cookies)?;
            println!("Saved session for {}", store.host());
            Ok(())
        }

        Command::Logout => {
            let store = cfg.session_store()?;
            store.clear()?;
            println!("Forgot session for {}", store.host());
            Ok(())
        }

        Command::Fetch { limit } => {
            let mut dash = dashboard(&cfg, backend(&cfg)?, cli.no_cache)?;
            let n = dash.refresh_accounts();
            flush_toasts(&mut dash);
            if n? == 0 {
                return Err(anyhow!("No connected accounts; run `mail_sorter login`"));
            }
            let added = dash.initial_fetch(limit);
            flush_toasts(&mut dash);
            println!("{} new emails cached", added?);
            Ok(())
        }

        Command::Login => {
            let backend = backend(&cfg)?;
            let url = login_url_after_check(&cfg.api_base()?, backend.has_refresh_token())?;
            println!("Opening {url}");
            if let Err(e) = open::that(url.as_str()) {
                eprintln!("Could not open browser ({e}); visit the URL above.");
            }
            println!(
                "After logging in, copy the `{}` and `{}` cookies and run `mail_sorter set-session`.",
                cfg.session_cookie_name, cfg.csrf_cookie_name
            );
            Ok(())
        }

        Command::Watch { no_fetch } => {
            let backend = backend(&cfg)?;
            let cookie_header = backend.cookie_header();
            let mut dash = dashboard(&cfg, backend, cli.no_cache)?;
            let n = dash.refresh_accounts()?;
            if n == 0 {
                return Err(anyhow!("No connected accounts; run `mail_sorter login`"));
            }
            if let Err(e) = dash.load_categories() {
                warn!("could not load categories: {e}");
            }
            if !no_fetch {
                match dash.initial_fetch(DEFAULT_FETCH_LIMIT) {
                    Ok(added) => eprintln!("{added} new emails cached"),
                    Err(e) if e.is_unauthorized() => return Err(e.into()),
                    Err(e) => warn!("initial fetch failed: {e}"),
                }
                flush_toasts(&mut dash);
            }
            eprintln!("Watching {n} accounts (Ctrl-C to stop)");
            run_daemon(
                &mut dash,
                WatchConfig {
                    ws_url: cfg.ws_url()?,
                    cookie_header,
                    desktop_notifications: cfg.desktop_notifications,
                },
            )
        }

        Command::Categories(sub) => {
            let mut dash = dashboard(&cfg, backend(&cfg)?, cli.no_cache)?;
            match sub {
                CategoryCmd::List => {
                    dash.load_categories()?;
                }
                CategoryCmd::Add { name, description } => {
                    dash.create_category(&CategoryDraft { name, description })?;
                }
                CategoryCmd::Update {
                    id,
                    name,
                    description,
                } => {
                    dash.load_categories()?;
                    dash.update_category(id, &CategoryDraft { name, description })?;
                }
                CategoryCmd::Delete { id } => {
                    dash.load_categories()?;
                    dash.delete_category(id)?;
                }
            }
            for c in dash.categories() {
                println!("{:>4}  {}  {}", c.id, c.name, c.description);
            }
            flush_toasts(&mut dash);
            Ok(())
        }

        Command::Accounts(sub) => {
            let mut dash = dashboard(&cfg, backend(&cfg)?, cli.no_cache)?;
            let n = dash.refresh_accounts();
            flush_toasts(&mut dash);
            if n? == 0 {
                println!("No connected accounts.");
                return Ok(());
            }
            match sub {
                AccountCmd::List => {
                    for a in dash.accounts() {
                        println!(
                            "{}  {}  ({} cached)",
                            a.id,
                            a.label(),
                            dash.cache().emails_for(&a.id).len()
                        );
                    }
                }
                AccountCmd::Disconnect { uid } => {
                    let r = dash.disconnect_account(&uid);
                    flush_toasts(&mut dash);
                    r?;
                }
                AccountCmd::DisconnectAll => {
                    dash.disconnect_all();
                }
            }
            flush_toasts(&mut dash);
            Ok(())
        }

        Command::Emails { account } => {
            let dash = dashboard(&cfg, backend(&cfg)?, cli.no_cache)?;
            for (acct, emails) in dash.cache().by_account() {
                if account.as_ref().is_some_and(|a| a != acct) {
                    continue;
                }
                println!("{acct} ({})", emails.len());
                for e in emails {
                    println!(
                        "  {}  {}  [{}]  {}",
                        e.id,
                        e.received_at
                            .map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M").to_string()),
                        e.category_key(),
                        e.subject
                    );
                }
            }
            Ok(())
        }

        Command::Open { id } => {
            let mut dash = dashboard(&cfg, backend(&cfg)?, cli.no_cache)?;
            let text = match dash.open_email(&id) {
                Some(detail) => {
                    let body = html2text::from_read(detail.body.as_bytes(), 80)
                        .map_err(|e| anyhow!("could not render email: {e}"))?;
                    Some(format!(
                        "Subject: {}\nCategory: {}\n\n{body}",
                        detail.subject, detail.category
                    ))
                }
                None => None,
            };
            flush_toasts(&mut dash);
            if let Some(text) = text {
                println!("{text}");
            }
            Ok(())
        }

        Command::Recategorize { id } => {
            let mut dash = dashboard(&cfg, backend(&cfg)?, cli.no_cache)?;
            let r = dash.recategorize(&id);
            flush_toasts(&mut dash);
            println!("{id} -> {}", r?);
            Ok(())
        }

        Command::Bulk { action, ids } => {
            let mut dash = dashboard(&cfg, backend(&cfg)?, cli.no_cache)?;
            for id in &ids {
                if !dash.toggle_selection(id) {
                    eprintln!("{id} is not in the local cache; skipping");
                }
            }
            let outcome = dash.apply_bulk(action.into());
            flush_toasts(&mut dash);
            match outcome {
                BulkOutcome::Failed(e) => Err(e.into()),
                _ => Ok(()),
            }
        }
    }
}

fn backend(cfg: &Config) -> Result<HttpBackend> {
    let backend = HttpBackend::new(cfg.api_base()?, cfg.csrf_cookie_name.clone())?;
    let cookies = cfg.session_store()?.load()?;
    if cookies.session.is_none() {
        warn!("no stored session; run `mail_sorter set-session` after logging in");
    }
    Ok(backend.with_session(&cookies, &cfg.session_cookie_name))
}

fn dashboard(cfg: &Config, backend: HttpBackend, no_cache: bool) -> Result<Dashboard> {
    let store: Box<dyn CacheStore> = if no_cache {
        Box::new(MemoryStore::new())
    } else {
        Box::new(SqliteStore::open(&resolve_db_path(cfg)?)?)
    };
    let opts: DashboardOptions = cfg.dashboard_options();
    Ok(Dashboard::new(Box::new(backend), store, opts))
}

fn flush_toasts(dash: &mut Dashboard) {
    for toast in dash.toasts_mut().drain_new() {
        eprintln!("{}", toast.text);
    }
}

use clap::{Args, Parser, Subcommand};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::background::{ActiveTab, Background, CopyField};
use crate::clipboard::{Clipboard, CommandClipboard};
use crate::fill::FillField;
use crate::host::{HostClient, ProcessTransport};
use crate::login::LoginId;
use crate::settings::{default_settings_path, SettingsFile, SettingsStore};

#[derive(Parser)]
#[command(name = "passfill", version = crate::version::APP_VERSION)]
pub struct Cli {
    /// Settings file (default: <config dir>/passfill/settings.json).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,
    /// Native host executable.
    #[arg(long, global = true)]
    host: Option<PathBuf>,
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ranked logins for a host.
    List(ListArgs),
    /// Parsed fields of one login.
    Show(ShowArgs),
    /// Copy a login's password or username to the clipboard.
    Copy(CopyArgs),
    /// Open a page in the browser and fill a login into it.
    Fill(FillArgs),
    /// Launch the browser and answer UI requests on a Unix socket.
    Serve(ServeArgs),
    Settings(SettingsArgs),
}

#[derive(Args)]
struct LoginArgs {
    #[arg(long)]
    store: String,
    #[arg(long)]
    path: String,
}

impl LoginArgs {
    fn id(&self) -> Result<LoginId, Box<dyn Error>> {
        let store = self.store.trim();
        let path = self.path.trim().trim_end_matches(".gpg");
        if store.is_empty() || path.is_empty() {
            return Err("--store and --path must not be empty".into());
        }
        Ok(LoginId::new(store, path))
    }
}

#[derive(Args)]
struct ListArgs {
    /// Host to rank for; without it no login matches.
    #[arg(long)]
    host_name: Option<String>,
    /// Only logins whose store/path contains every term.
    #[arg(long)]
    search: Option<String>,
}

#[derive(Args)]
struct ShowArgs {
    #[command(flatten)]
    login: LoginArgs,
    #[arg(long, default_value_t = false)]
    reveal: bool,
}

#[derive(Args)]
struct CopyArgs {
    #[command(flatten)]
    login: LoginArgs,
    /// Copy the username instead of the password.
    #[arg(long, default_value_t = false)]
    username: bool,
}

#[derive(Args)]
struct FillArgs {
    #[arg(long)]
    url: String,
    #[command(flatten)]
    login: LoginArgs,
    /// Comma-separated: login, secret, openid.
    #[arg(long, value_delimiter = ',', default_values_t = ["login".to_string(), "secret".to_string()])]
    fields: Vec<String>,
    /// Browser profile directory.
    #[arg(long)]
    profile: Option<PathBuf>,
}

#[derive(Args)]
struct ServeArgs {
    #[arg(long)]
    socket: Option<PathBuf>,
    /// Browser profile directory.
    #[arg(long)]
    profile: Option<PathBuf>,
}

#[derive(Args)]
struct SettingsArgs {
    #[command(subcommand)]
    command: SettingsCommand,
}

#[derive(Subcommand)]
enum SettingsCommand {
    /// Print the persisted settings.
    Get,
    SetAutoSubmit {
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
    /// Forget every foreign-origin fill decision for a host.
    ForgetForeign {
        #[arg(value_name = "HOST")]
        site: String,
    },
}

struct Context {
    settings: Arc<SettingsFile>,
    host: Option<PathBuf>,
}

impl Context {
    fn background(&self) -> Result<Background, Box<dyn Error>> {
        let transport = ProcessTransport::locate(self.host.as_deref())?;
        log::debug!("using native host {}", transport.program().display());
        Ok(Background::new(
            self.settings.clone(),
            HostClient::new(Box::new(transport)),
        ))
    }
}

pub fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    crate::init_logging(cli.verbose);

    let settings_path = match cli.settings {
        Some(path) => path,
        None => default_settings_path()?,
    };
    let context = Context {
        settings: Arc::new(SettingsFile::new(settings_path)),
        host: cli.host,
    };

    match cli.command {
        Commands::List(args) => run_list(&context, args),
        Commands::Show(args) => run_show(&context, args),
        Commands::Copy(args) => run_copy(&context, args),
        Commands::Fill(args) => run_fill(&context, args),
        Commands::Serve(args) => run_serve(&context, args),
        Commands::Settings(args) => run_settings(&context, args),
    }
}

fn runtime() -> Result<tokio::runtime::Runtime, Box<dyn Error>> {
    Ok(tokio::runtime::Runtime::new()?)
}

fn run_list(context: &Context, args: ListArgs) -> Result<(), Box<dyn Error>> {
    let background = context.background()?;
    let directory = runtime()?.block_on(background.list_files(Some(
        args.host_name.unwrap_or_default(),
    )))?;

    let candidates: Vec<_> = match args.search.as_deref() {
        Some(query) => directory.search(query),
        None => directory.candidates().iter().collect(),
    };
    for candidate in candidates {
        let marker = if candidate.recency.count > 0 {
            format!(" ({} uses)", candidate.recency.count)
        } else {
            String::new()
        };
        println!("{:?}\t{}{marker}", candidate.affinity, candidate.label());
    }
    Ok(())
}

fn run_show(context: &Context, args: ShowArgs) -> Result<(), Box<dyn Error>> {
    let id = args.login.id()?;
    let background = context.background()?;
    let record = runtime()?.block_on(background.fetch_record(&id))?;

    let mut fields = serde_json::to_value(record.fields())?;
    if !args.reveal {
        fields["secret"] = serde_json::Value::String("********".to_string());
    }
    let output = serde_json::json!({
        "storeId": id.store_id,
        "path": id.path,
        "fields": fields,
        "settings": record.settings(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn run_copy(context: &Context, args: CopyArgs) -> Result<(), Box<dyn Error>> {
    let id = args.login.id()?;
    let clipboard: Arc<dyn Clipboard> = Arc::new(CommandClipboard::detect()?);
    let background = context.background()?.with_clipboard(clipboard);
    let field = if args.username {
        CopyField::Username
    } else {
        CopyField::Password
    };

    runtime()?.block_on(async {
        let clear = background.copy(&id, field).await?;
        eprintln!(
            "Copied to clipboard; it will be cleared in {}s (Ctrl+C to keep it).",
            crate::clipboard::CLEAR_AFTER.as_secs()
        );
        clear.await.map_err(|err| err.to_string())?;
        Ok::<(), Box<dyn Error>>(())
    })
}

fn parse_fields(names: &[String]) -> Result<Vec<FillField>, Box<dyn Error>> {
    names
        .iter()
        .map(|name| {
            FillField::parse(name.trim())
                .ok_or_else(|| {
                    Box::<dyn Error>::from(format!(
                        "unknown field '{name}' (expected login, secret or openid)"
                    ))
                })
        })
        .collect()
}

fn run_fill(context: &Context, args: FillArgs) -> Result<(), Box<dyn Error>> {
    let id = args.login.id()?;
    let fields = parse_fields(&args.fields)?;
    let background = context.background()?;

    runtime()?.block_on(async {
        let session = BrowserSession::start(args.profile.as_deref()).await?;
        let background = session.attach(background);

        session.tab.navigate(&args.url).await?;
        let filled = background.fill(&id, &fields).await?;
        let names: Vec<&str> = filled.iter().map(|field| field.as_str()).collect();
        eprintln!("Filled: {}. Close the browser to exit.", names.join(", "));

        session.wait().await;
        Ok::<(), Box<dyn Error>>(())
    })
}

#[cfg(not(unix))]
fn run_serve(_context: &Context, _args: ServeArgs) -> Result<(), Box<dyn Error>> {
    Err("the UI socket is currently supported only on unix platforms".into())
}

#[cfg(unix)]
fn run_serve(context: &Context, args: ServeArgs) -> Result<(), Box<dyn Error>> {
    let socket_path = args
        .socket
        .unwrap_or_else(crate::background::socket::default_socket_path);
    let background = context.background()?;
    let clipboard = CommandClipboard::detect();

    runtime()?.block_on(async {
        let session = BrowserSession::start(args.profile.as_deref()).await?;
        let mut background = session.attach(background);
        match clipboard {
            Ok(clipboard) => background = background.with_clipboard(Arc::new(clipboard)),
            Err(err) => log::warn!("clipboard actions disabled: {err}"),
        }

        println!("UI socket: {}", socket_path.display());
        crate::background::socket::serve(&background, &socket_path, || {
            !session.handler.is_finished()
        })
        .await?;
        session.close().await;
        Ok::<(), Box<dyn Error>>(())
    })
}

fn run_settings(context: &Context, args: SettingsArgs) -> Result<(), Box<dyn Error>> {
    match args.command {
        SettingsCommand::Get => {
            let settings = context.settings.load()?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        SettingsCommand::SetAutoSubmit { enabled } => {
            context.settings.update(&mut |settings| settings.auto_submit = enabled)?;
            eprintln!("autoSubmit = {enabled}");
        }
        SettingsCommand::ForgetForeign { site } => {
            let mut forgotten = false;
            context.settings.update(&mut |settings| {
                forgotten = settings.forget_foreign_decisions(site.trim());
            })?;
            if forgotten {
                eprintln!("Forgot foreign-origin decisions for {site}.");
            } else {
                eprintln!("No foreign-origin decisions stored for {site}.");
            }
        }
    }
    Ok(())
}

/// A launched browser with its first tab attached.
struct BrowserSession {
    browser: chromiumoxide::browser::Browser,
    handler: tokio::task::JoinHandle<()>,
    tab: Arc<crate::browser::tab::BrowserTab>,
    auth: Arc<crate::auth::AuthResponderRegistry>,
    submissions: Arc<crate::credentials::SubmissionLog>,
}

impl BrowserSession {
    async fn start(profile: Option<&Path>) -> Result<Self, Box<dyn Error>> {
        let chrome_path = crate::browser::find_chrome_binary()?;
        let profile_dir = crate::browser::resolve_profile_dir(profile)?;
        eprintln!("Using browser: {}", chrome_path.display());
        eprintln!("Profile dir: {}", profile_dir.display());

        let (mut browser, handler) =
            crate::browser::launch_browser(&chrome_path, &profile_dir).await?;
        let page = crate::browser::open_start_page(&mut browser).await?;

        let auth = Arc::new(crate::auth::AuthResponderRegistry::default());
        let submissions = Arc::new(crate::credentials::SubmissionLog::default());
        let tab = crate::browser::tab::BrowserTab::attach(page, auth.clone(), submissions.clone())
            .await?;
        Ok(Self {
            browser,
            handler,
            tab: Arc::new(tab),
            auth,
            submissions,
        })
    }

    fn attach(&self, background: Background) -> Background {
        background
            .with_tab(self.tab.clone())
            .with_auth_registry(self.auth.clone())
            .with_submissions(self.submissions.clone())
    }

    /// Wait for the user to close the browser.
    async fn wait(self) {
        let _ = self.handler.await;
    }

    async fn close(mut self) {
        if let Err(err) = self.browser.close().await {
            log::debug!("browser close failed: {err}");
        }
        let _ = tokio::time::timeout(std::time::Duration::from_secs(5), self.handler).await;
    }
}

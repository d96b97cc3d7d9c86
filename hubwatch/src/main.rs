//! Entry point for hubwatch. Parses args, then either watches the control service
//! or runs a single action against one application.

use std::env;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hubwatch::actions::Action;
use hubwatch::config::MonitorConfig;
use hubwatch::dispatcher::ActionDispatcher;
use hubwatch::health::LiveStatus;
use hubwatch::profiles::{load_profiles, save_profiles, ProfileEntry, ProfileRequest, ResolveProfile};
use hubwatch::report;
use hubwatch::{ControlApi, HealthMonitor, HttpControlClient, ServerMonitor};

const USAGE: &str = "[--profile NAME|-P NAME] [--save] [--token TOKEN|-k TOKEN] [--login EMAIL] [--app NAME --action ID [--lines N]] [--filter TEXT] [--dry-run] [http://HOST:PORT/api]";

const STATE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
struct ParsedArgs {
    url: Option<String>,
    profile: Option<String>,
    save: bool,
    token: Option<String>,
    login: Option<String>,
    app: Option<String>,
    action: Option<String>,
    lines: Option<u32>,
    filter: String,
    dry_run: bool,
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<ParsedArgs, String> {
    let mut it = args.into_iter();
    let prog = it.next().unwrap_or_else(|| "hubwatch".into());
    let mut p = ParsedArgs::default();

    while let Some(arg) = it.next() {
        match arg.as_str() {
            "-h" | "--help" => return Err(format!("Usage: {prog} {USAGE}")),
            "--profile" | "-P" => p.profile = it.next(),
            "--save" => p.save = true,
            "--token" | "-k" => p.token = it.next(),
            "--login" => p.login = it.next(),
            "--app" => p.app = it.next(),
            "--action" => p.action = it.next(),
            "--lines" => {
                let v = it.next().unwrap_or_default();
                p.lines = Some(v.parse().map_err(|_| format!("invalid --lines value '{v}'"))?);
            }
            "--filter" => p.filter = it.next().unwrap_or_default(),
            "--dry-run" => p.dry_run = true,
            _ if arg.starts_with("--profile=") => {
                if let Some((_, v)) = arg.split_once('=') {
                    if !v.is_empty() {
                        p.profile = Some(v.to_string());
                    }
                }
            }
            _ if arg.starts_with('-') => {
                return Err(format!("Unknown flag '{arg}'. Usage: {prog} {USAGE}"));
            }
            _ => {
                if p.url.is_none() {
                    p.url = Some(arg);
                } else {
                    return Err(format!("Unexpected argument. Usage: {prog} {USAGE}"));
                }
            }
        }
    }
    if p.action.is_some() && p.app.is_none() {
        return Err(format!("--action needs --app. Usage: {prog} {USAGE}"));
    }
    Ok(p)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let parsed = match parse_args(env::args()) {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("{msg}");
            return Ok(());
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hubwatch=info")),
        )
        .with_writer(io::stderr)
        .init();

    let Some(entry) = resolve_connection(&parsed)? else {
        return Ok(());
    };

    if parsed.dry_run {
        println!("{}", entry.url);
        return Ok(());
    }

    let client = HttpControlClient::new(&entry.url)
        .with_context(|| format!("invalid control service url '{}'", entry.url))?;
    authenticate(&client, &parsed, &entry).await?;
    let api: Arc<dyn ControlApi> = Arc::new(client);
    let config = MonitorConfig::from_env();

    match (parsed.app, parsed.action) {
        (Some(app), Some(action)) => {
            let mut action = Action::parse(&action);
            if let Some(n) = parsed.lines {
                action = action.with_lines(n);
            }
            run_action(api, config, &app, action).await
        }
        _ => watch(api, config, &parsed.filter).await,
    }
}

// Profile handling: Ok(None) means the user aborted or nothing could be resolved.
fn resolve_connection(parsed: &ParsedArgs) -> anyhow::Result<Option<ProfileEntry>> {
    let profiles_file = load_profiles();
    let req = ProfileRequest {
        profile_name: parsed.profile.clone(),
        url: parsed.url.clone(),
        email: parsed.login.clone(),
    };
    let mut profiles_mut = profiles_file.clone();
    let entry = match req.resolve(&profiles_file) {
        ResolveProfile::Direct(entry) => {
            if let Some(name) = parsed.profile.as_ref() {
                match profiles_mut.profiles.get(name) {
                    None => {
                        // New profile: save right away
                        profiles_mut.profiles.insert(name.clone(), entry.clone());
                        save_profiles(&profiles_mut).context("saving profiles")?;
                    }
                    Some(existing) if existing != &entry => {
                        let overwrite = parsed.save
                            || prompt_yes_no(&format!("Overwrite existing profile '{name}'? [y/N]: "));
                        if overwrite {
                            profiles_mut.profiles.insert(name.clone(), entry.clone());
                            save_profiles(&profiles_mut).context("saving profiles")?;
                        }
                    }
                    Some(_) => {}
                }
            }
            entry
        }
        ResolveProfile::Loaded(entry) => entry,
        ResolveProfile::PromptSelect(names) => {
            eprintln!("Select profile:");
            for (i, n) in names.iter().enumerate() {
                eprintln!("  {}. {}", i + 1, n);
            }
            let line = prompt_string("Enter number (or blank to abort): ")?;
            let picked = line
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|i| (1..=names.len()).contains(i))
                .and_then(|i| profiles_mut.profiles.get(&names[i - 1]).cloned());
            match picked {
                Some(entry) => entry,
                None => return Ok(None),
            }
        }
        ResolveProfile::PromptCreate(name) => {
            eprintln!("Profile '{name}' does not exist yet.");
            let url = prompt_string(&format!("Enter URL (blank for {}): ", hubwatch::DEFAULT_BASE_URL))?;
            let url = match url.trim() {
                "" => hubwatch::DEFAULT_BASE_URL.to_string(),
                u => u.to_string(),
            };
            let email = prompt_string("Enter login email (or leave blank): ")?;
            let entry = ProfileEntry {
                url,
                email: Some(email.trim().to_string()).filter(|e| !e.is_empty()),
            };
            profiles_mut.profiles.insert(name, entry.clone());
            save_profiles(&profiles_mut).context("saving profiles")?;
            entry
        }
        ResolveProfile::None => ProfileEntry {
            url: hubwatch::DEFAULT_BASE_URL.to_string(),
            email: parsed.login.clone(),
        },
    };
    Ok(Some(entry))
}

// Token precedence: --token, then HUBWATCH_TOKEN, then an interactive login.
async fn authenticate(
    client: &HttpControlClient,
    parsed: &ParsedArgs,
    entry: &ProfileEntry,
) -> anyhow::Result<()> {
    if let Some(t) = parsed.token.clone() {
        client.set_token(Some(t));
    } else if let Ok(t) = env::var("HUBWATCH_TOKEN") {
        client.set_token(Some(t));
    }
    if client.is_authenticated() {
        return Ok(());
    }
    let Some(email) = entry.email.as_deref() else {
        bail!("no credentials: pass --token, set HUBWATCH_TOKEN, or use --login EMAIL");
    };
    let password = prompt_string(&format!("Password for {email}: "))?;
    client
        .login(email, password.trim_end_matches(['\r', '\n']))
        .await
        .map_err(|e| anyhow!("login failed: {}", e.user_message()))?;
    Ok(())
}

async fn watch(api: Arc<dyn ControlApi>, config: MonitorConfig, filter: &str) -> anyhow::Result<()> {
    let health = HealthMonitor::start(api.clone(), config.clone());
    let server = ServerMonitor::start(api, config);
    let mut health_rx = health.subscribe();
    let mut server_rx = server.subscribe();
    let mut last_health: Vec<String> = Vec::new();
    let mut last_server: Vec<String> = Vec::new();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            r = health_rx.changed() => {
                if r.is_err() {
                    break;
                }
                let lines = report::health_lines(&health_rx.borrow_and_update(), filter);
                print_if_changed(&mut last_health, lines);
            }
            r = server_rx.changed() => {
                if r.is_err() {
                    break;
                }
                let lines = report::server_lines(&server_rx.borrow_and_update());
                print_if_changed(&mut last_server, lines);
            }
        }
    }
    info!("shutting down");
    health.shutdown().await;
    server.shutdown().await;
    Ok(())
}

fn print_if_changed(last: &mut Vec<String>, lines: Vec<String>) {
    if *last != lines {
        for l in &lines {
            println!("{l}");
        }
        *last = lines;
    }
}

async fn run_action(
    api: Arc<dyn ControlApi>,
    config: MonitorConfig,
    app: &str,
    action: Action,
) -> anyhow::Result<()> {
    let health = HealthMonitor::start(api.clone(), config);
    let mut rx = health.subscribe();
    let found = tokio::time::timeout(STATE_TIMEOUT, rx.wait_for(|s| s.updated_at.is_some() && !s.loading))
        .await
        .ok()
        .and_then(|r| r.ok().map(|s| s.application(app).cloned()));
    let Some(selected) = found.flatten() else {
        health.shutdown().await;
        bail!("application '{app}' not found");
    };

    let (dispatcher, mut notices) = ActionDispatcher::new(api, Arc::new(health.clone()));
    dispatcher.select(selected.clone());
    let outcome = dispatcher.execute(action).await;

    while let Ok(n) = notices.try_recv() {
        println!("{}", report::notification_line(&n));
    }
    if let Some(text) = report::dispatch_text(&outcome) {
        println!("{text}");
    }
    if selected.has_live_check() {
        // `execute` already asked for a re-check; wait for its result.
        let live = tokio::time::timeout(
            STATE_TIMEOUT,
            rx.wait_for(|s| s.live_status(app) != LiveStatus::Checking),
        )
        .await
        .ok()
        .and_then(|r| r.ok().map(|s| s.live_status(app)))
        .unwrap_or_default();
        println!("{app}: {}", report::live_badge(live));
    } else {
        warn!(app, "no application url, liveness not checked");
    }
    health.shutdown().await;
    Ok(())
}

fn prompt_yes_no(prompt: &str) -> bool {
    eprint!("{prompt}");
    let _ = io::stderr().flush();
    let mut line = String::new();
    if io::stdin().read_line(&mut line).is_ok() {
        matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    } else {
        false
    }
}

fn prompt_string(prompt: &str) -> io::Result<String> {
    eprint!("{prompt}");
    let _ = io::stderr().flush();
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line)
}

//! `tunebridge` command line front end over the plugin registry.

use anyhow::{anyhow, bail, Context};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tunebridge_plugin::{PluginDescriptor, PluginRegistry, SearchType};

#[derive(Parser, Debug)]
#[command(name = "tunebridge", version, about = "Install, load and query JavaScript music source plugins")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install a plugin from its source URL.
    Install(InstallArgs),
    /// Install or update every plugin listed in a feed.
    ImportFeed {
        url: String,
    },
    /// List installed plugins with their load status.
    List,
    /// Search through a plugin.
    Search(SearchArgs),
    /// Search songs, then resolve a playable URL for one hit.
    Stream(StreamArgs),
    /// Re-download a plugin's code and reload it.
    Refresh {
        /// Plugin id or name.
        plugin: String,
    },
    /// Remove a plugin together with its cached code and variables.
    Uninstall {
        plugin: String,
    },
    Enable {
        plugin: String,
    },
    Disable {
        plugin: String,
    },
    /// Set a user variable visible to the plugin through `env.getUserVariables()`.
    SetVar {
        plugin: String,
        name: String,
        value: String,
    },
}

#[derive(Args, Debug)]
struct InstallArgs {
    url: String,
    /// Display name; defaults to the file name in the URL.
    #[arg(long = "name")]
    name: Option<String>,
    #[arg(long = "version")]
    version: Option<String>,
    #[arg(long = "description")]
    description: Option<String>,
    /// Fallback URL, tried in order after the primary one. Repeatable.
    #[arg(long = "mirror")]
    mirrors: Vec<String>,
}

#[derive(Args, Debug)]
struct SearchArgs {
    /// Plugin id or name.
    plugin: String,
    query: String,
    /// music, artist, album or sheet.
    #[arg(long = "type", default_value = "music", value_parser = parse_search_type)]
    kind: SearchType,
    #[arg(long = "page", default_value_t = 1)]
    page: u32,
}

#[derive(Args, Debug)]
struct StreamArgs {
    /// Plugin id or name.
    plugin: String,
    query: String,
    /// Which search hit to resolve, zero based.
    #[arg(long = "index", default_value_t = 0)]
    index: usize,
}

fn parse_search_type(s: &str) -> Result<SearchType, String> {
    SearchType::parse(s).ok_or_else(|| format!("unknown search type '{s}'"))
}

/// Name a plugin after the last path segment of its URL, minus `.js`.
fn name_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.rfind(|s| !s.is_empty())?;
    let name = segment.strip_suffix(".js").unwrap_or(segment);
    (!name.is_empty()).then(|| name.to_string())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Resolve a plugin id or name to its id.
async fn plugin_id(registry: &PluginRegistry, plugin: &str) -> anyhow::Result<String> {
    registry
        .find(plugin)
        .await
        .map(|record| record.meta.id)
        .ok_or_else(|| anyhow!("no plugin named '{plugin}' is installed"))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let registry = PluginRegistry::from_env()
        .await
        .context("failed to open plugin registry")?;

    match cli.command {
        Commands::Install(args) => {
            let name = match args.name {
                Some(name) => name,
                None => name_from_url(&args.url)
                    .ok_or_else(|| anyhow!("cannot derive a name from '{}', pass --name", args.url))?,
            };
            let mut descriptor = PluginDescriptor::new(name, args.url).with_mirrors(args.mirrors);
            if let Some(version) = args.version {
                descriptor = descriptor.with_version(version);
            }
            descriptor.description = args.description;
            let installed = registry.install(descriptor).await?;
            println!("installed {} ({})", installed.name(), installed.id);
        }
        Commands::ImportFeed { url } => {
            let report = registry.import_feed(&url).await?;
            for plugin in &report.installed {
                println!("installed {} ({})", plugin.name(), plugin.id);
            }
            for plugin in &report.updated {
                println!("updated   {} ({})", plugin.name(), plugin.id);
            }
            println!(
                "{} installed, {} updated, {} unchanged, {} rejected",
                report.installed.len(),
                report.updated.len(),
                report.unchanged,
                report.rejected
            );
        }
        Commands::List => {
            let records = registry.list().await;
            if records.is_empty() {
                println!("no plugins installed");
            }
            for record in records {
                let version = record.meta.descriptor.version.as_deref().unwrap_or("-");
                let enabled = if record.meta.enabled { "enabled" } else { "disabled" };
                println!(
                    "{}  {:<24} {:<10} {:<8} {}",
                    record.meta.id,
                    record.meta.name(),
                    version,
                    enabled,
                    record.meta.descriptor.url
                );
                if let Some(error) = record.error {
                    println!("    last error: {error}");
                }
            }
        }
        Commands::Search(args) => {
            let id = plugin_id(&registry, &args.plugin).await?;
            let plugin = registry.load(&id).await?;
            match args.kind {
                SearchType::Music => print_json(&plugin.search_songs(&args.query, args.page).await?)?,
                SearchType::Artist => print_json(&plugin.search_artists(&args.query, args.page).await?)?,
                SearchType::Album => print_json(&plugin.search_albums(&args.query, args.page).await?)?,
                SearchType::Sheet => print_json(&plugin.search_playlists(&args.query, args.page).await?)?,
            }
        }
        Commands::Stream(args) => {
            let id = plugin_id(&registry, &args.plugin).await?;
            let plugin = registry.load(&id).await?;
            let page = plugin.search_songs(&args.query, 1).await?;
            let Some(track) = page.data.get(args.index) else {
                bail!("search returned {} songs, no hit at index {}", page.data.len(), args.index);
            };
            tracing::info!(plugin = %plugin.name(), track = %track.title, "resolving stream");
            print_json(&plugin.resolve_stream(track).await?)?;
        }
        Commands::Refresh { plugin } => {
            let id = plugin_id(&registry, &plugin).await?;
            let instance = registry.reload(&id).await?;
            let capabilities: Vec<&str> = instance.capabilities().iter().map(|c| c.as_str()).collect();
            println!(
                "reloaded {} as {} [{}]",
                instance.name(),
                instance.shape().as_str(),
                capabilities.join(", ")
            );
        }
        Commands::Uninstall { plugin } => {
            let id = plugin_id(&registry, &plugin).await?;
            let removed = registry.uninstall(&id).await?;
            println!("uninstalled {}", removed.name());
        }
        Commands::Enable { plugin } => {
            let id = plugin_id(&registry, &plugin).await?;
            registry.set_enabled(&id, true).await?;
        }
        Commands::Disable { plugin } => {
            let id = plugin_id(&registry, &plugin).await?;
            registry.set_enabled(&id, false).await?;
        }
        Commands::SetVar { plugin, name, value } => {
            let id = plugin_id(&registry, &plugin).await?;
            registry.set_variable(&id, &name, &value).await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match run(Cli::parse()).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_from_url() {
        assert_eq!(
            name_from_url("https://cdn.example.com/plugins/kuwo.js").as_deref(),
            Some("kuwo")
        );
        assert_eq!(
            name_from_url("https://cdn.example.com/plugins/netease/").as_deref(),
            Some("netease")
        );
        assert_eq!(name_from_url("https://cdn.example.com/"), None);
        assert_eq!(name_from_url("not a url"), None);
    }

    #[test]
    fn test_parse_search_arguments() {
        let cli = Cli::try_parse_from([
            "tunebridge", "search", "kuwo", "hello", "--type", "playlist", "--page", "2",
        ])
        .unwrap();
        match cli.command {
            Commands::Search(args) => {
                assert_eq!(args.plugin, "kuwo");
                assert_eq!(args.kind, SearchType::Sheet);
                assert_eq!(args.page, 2);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(Cli::try_parse_from(["tunebridge", "search", "kuwo", "x", "--type", "video"]).is_err());
    }

    #[test]
    fn test_install_accepts_repeated_mirrors() {
        let cli = Cli::try_parse_from([
            "tunebridge",
            "install",
            "https://a.example/p.js",
            "--mirror",
            "https://b.example/p.js",
            "--mirror",
            "https://c.example/p.js",
        ])
        .unwrap();
        match cli.command {
            Commands::Install(args) => assert_eq!(args.mirrors.len(), 2),
            other => panic!("unexpected command {other:?}"),
        }
    }
}

//! mongoz - command-line client for MongoDB
//!
//! Usage:
//!   mongoz profiles                         List stored connection profiles
//!   mongoz add-profile --endpoints h:p ...  Store a connection profile
//!   mongoz test                             Check that the server answers
//!   mongoz databases                        List databases and collections
//!   mongoz find db.coll --filter '{...}'    Run a find
//!   mongoz aggregate db.coll '[{...}]'      Run an aggregation pipeline
//!   mongoz get db.coll <id>                 Show one document
//!   mongoz update db.coll '{ _id: ... }'    Replace one document
//!   mongoz delete db.coll <id>              Delete one document
//!
//! The profile comes from `--uri`, or `--profile <label-or-id>` looked up in
//! the profile file, or the only stored profile, or `localhost:27017`.

mod logging;
mod output;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use mongoz_connection::{ConnectionManager, LoadingSink, ProfileStore};
use mongoz_core::{
    CollectionRef, CollectionResult, ConnectionProfile, DocumentTree, Node, ProfileFields,
    QueryOptions, RawQuery,
};
use mongoz_core::bson::Bson;
use std::cell::RefCell;
use std::path::PathBuf;

use crate::logging::LoggingConfig;
use crate::output::Format;

#[derive(Parser, Debug)]
#[command(name = "mongoz")]
#[command(about = "Query and edit MongoDB collections", long_about = None)]
#[command(version)]
struct Cli {
    /// Profile file (defaults to <config dir>/mongoz/profiles.json)
    #[arg(long, global = true, env = "MONGOZ_PROFILES")]
    profiles: Option<PathBuf>,

    /// Label or id of the stored profile to use
    #[arg(short, long, global = true, env = "MONGOZ_PROFILE")]
    profile: Option<String>,

    /// Comma-separated host:port list; bypasses the profile file
    #[arg(long, global = true, conflicts_with = "profile")]
    uri: Option<String>,

    /// Debug logging for the mongoz crates
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also write JSON logs under the log directory
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List stored connection profiles
    Profiles,
    /// Store a connection profile
    AddProfile(AddProfileArgs),
    /// Open a connection, ping the server, and close it
    Test,
    /// List databases and their collections
    Databases,
    /// Run a find against a collection
    Find(FindArgs),
    /// Run an aggregation pipeline against a collection
    Aggregate {
        /// Collection as database.collection
        collection: CollectionRef,
        /// Array of stage documents
        pipeline: String,
        #[arg(long, value_enum, default_value = "pretty")]
        format: Format,
    },
    /// Show the document with the given _id
    Get {
        collection: CollectionRef,
        /// Identifier in document syntax, e.g. 'ObjectId("...")' or 42
        id: String,
    },
    /// Replace the stored document that has the same _id
    Update {
        collection: CollectionRef,
        /// The whole document, including its _id
        document: String,
    },
    /// Delete the document with the given _id
    Delete {
        collection: CollectionRef,
        id: String,
    },
}

#[derive(Args, Debug)]
struct FindArgs {
    /// Collection as database.collection
    collection: CollectionRef,
    #[arg(long, default_value = "")]
    filter: String,
    #[arg(long, default_value = "")]
    projection: String,
    #[arg(long, default_value = "")]
    sort: String,
    #[arg(long, default_value = "")]
    limit: String,
    #[arg(long, value_enum, default_value = "pretty")]
    format: Format,
}

impl FindArgs {
    fn raw_query(&self) -> RawQuery {
        RawQuery::new()
            .filter(self.filter.as_str())
            .projection(self.projection.as_str())
            .sort(self.sort.as_str())
            .limit(self.limit.as_str())
    }
}

#[derive(Args, Debug)]
struct AddProfileArgs {
    #[arg(long)]
    label: String,
    /// Comma-separated host:port list
    #[arg(long)]
    endpoints: String,
    #[arg(long, default_value = "")]
    username: String,
    #[arg(long, default_value = "", env = "MONGOZ_PASSWORD", hide_env_values = true)]
    password: String,
    /// "", "MONGODB-CR" or "SCRAM-SHA-1"
    #[arg(long, default_value = "")]
    auth_mechanism: String,
    #[arg(long, default_value = "")]
    auth_database: String,
    #[arg(long, default_value = "")]
    user_database: String,
    #[arg(long)]
    tls: bool,
    #[arg(long, default_value = "")]
    read_preference: String,
    /// Comma-separated collection names or glob patterns
    #[arg(long, default_value = "")]
    ignore: String,
}

impl AddProfileArgs {
    fn into_fields(self) -> ProfileFields {
        ProfileFields {
            label: self.label,
            server_urls: self.endpoints,
            username: self.username,
            password: self.password,
            auth_mechanism: self.auth_mechanism,
            auth_database: self.auth_database,
            user_database: self.user_database,
            tls: self.tls,
            read_preference: self.read_preference,
            collections_to_ignore: self.ignore,
            ..ProfileFields::default()
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = if cli.verbose {
        LoggingConfig::verbose()
    } else {
        LoggingConfig::default()
    };
    let _guard = logging::init(config.with_json_logs(cli.log_json))?;

    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    let store = match &cli.profiles {
        Some(path) => ProfileStore::new(path),
        None => ProfileStore::open_default()?,
    };

    match cli.command {
        Command::Profiles => {
            let profiles = store.load()?;
            if profiles.is_empty() {
                println!("No profiles in {}", store.path().display());
            } else {
                println!("{}", output::profiles_table(&profiles));
            }
            return Ok(());
        }
        Command::AddProfile(args) => {
            let profile = args.into_fields().into_profile()?;
            let name = profile.display_name();
            store.upsert(profile)?;
            println!("Saved profile '{}' to {}", name, store.path().display());
            return Ok(());
        }
        _ => {}
    }

    let profile = select_profile(&store, cli.profile.as_deref(), cli.uri.as_deref())?;
    tracing::debug!(profile = %profile.display_name(), "profile selected");
    let manager = ConnectionManager::new()?;

    match cli.command {
        Command::Test => {
            manager.test_connection(&profile)?;
            println!("Connection to {} succeeded", profile.display_name());
        }
        Command::Databases => {
            let info = manager.load_server(&profile)?;
            println!("{}", output::server_table(&info));
        }
        Command::Find(args) => {
            let options = QueryOptions::parse(&args.raw_query())?;
            let result = load(&manager, &profile, &args.collection, &options)?;
            print_result(&result, args.format);
        }
        Command::Aggregate {
            collection,
            pipeline,
            format,
        } => {
            let options = QueryOptions::parse(&RawQuery::new().pipeline(pipeline))?;
            let result = load(&manager, &profile, &collection, &options)?;
            print_result(&result, format);
        }
        Command::Get { collection, id } => {
            let document = manager.find_one(&profile, &collection, &parse_id(&id)?)?;
            println!("{}", document.serialize_pretty());
        }
        Command::Update {
            collection,
            document,
        } => {
            let tree = DocumentTree::parse(&document).context("Invalid document")?;
            manager.update(&profile, &collection, &tree)?;
            println!("Updated 1 document in {}", collection);
        }
        Command::Delete { collection, id } => {
            manager.delete(&profile, &collection, &parse_id(&id)?)?;
            println!("Deleted 1 document from {}", collection);
        }
        Command::Profiles | Command::AddProfile(_) => {}
    }

    manager.disconnect_all()?;
    Ok(())
}

/// `--uri` wins, then `--profile`, then the only stored profile, then localhost
fn select_profile(
    store: &ProfileStore,
    key: Option<&str>,
    uri: Option<&str>,
) -> Result<ConnectionProfile> {
    if let Some(uri) = uri {
        let endpoints = uri
            .trim()
            .trim_start_matches("mongodb://")
            .trim_end_matches('/')
            .split(',')
            .map(str::trim)
            .filter(|endpoint| !endpoint.is_empty());
        return Ok(ConnectionProfile::new(endpoints));
    }

    if let Some(key) = key {
        return store
            .find(key)?
            .with_context(|| format!("No profile '{}' in {}", key, store.path().display()));
    }

    let mut profiles = store.load()?;
    match profiles.len() {
        0 => Ok(ConnectionProfile::localhost()),
        1 => Ok(profiles.remove(0)),
        n => bail!(
            "{} profiles in {}; choose one with --profile",
            n,
            store.path().display()
        ),
    }
}

fn parse_id(text: &str) -> Result<Bson> {
    let node = Node::parse(text).with_context(|| format!("Invalid _id '{}'", text))?;
    Ok(Bson::from(node))
}

/// Logs the loading window of a CLI query
struct TraceLoading;

impl LoadingSink for TraceLoading {
    fn loading_started(&self) {
        tracing::debug!("loading started");
    }

    fn loading_finished(&self) {
        tracing::debug!("loading finished");
    }
}

fn load(
    manager: &ConnectionManager,
    profile: &ConnectionProfile,
    collection: &CollectionRef,
    options: &QueryOptions,
) -> Result<CollectionResult> {
    let delivered = RefCell::new(None);
    manager.run_query(
        profile,
        collection,
        options,
        &TraceLoading,
        &|result: mongoz_core::Result<CollectionResult>| {
            *delivered.borrow_mut() = Some(result);
        },
    );
    match delivered.into_inner() {
        Some(result) => Ok(result?),
        None => bail!("The query produced no result"),
    }
}

fn print_result(result: &CollectionResult, format: Format) {
    let rendered = output::render_documents(result, format);
    if !rendered.is_empty() {
        println!("{}", rendered);
    }
    eprintln!(
        "{} document(s) in {} ms",
        result.len(),
        result.execution_time_ms
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn empty_store() -> (tempfile::TempDir, ProfileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path().join("profiles.json"));
        (dir, store)
    }

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_find_arguments() {
        let cli = Cli::try_parse_from([
            "mongoz",
            "--uri",
            "localhost:27017",
            "find",
            "test.dummyCollection",
            "--filter",
            "{\"label\":\"tata\"}",
            "--limit",
            "3",
            "--format",
            "table",
        ])
        .unwrap();

        let Command::Find(args) = cli.command else {
            panic!("expected find");
        };
        assert_eq!(args.collection, CollectionRef::new("test", "dummyCollection"));
        assert_eq!(args.format, Format::Table);
        let options = QueryOptions::parse(&args.raw_query()).unwrap();
        assert_eq!(options.limit, Some(3));
        assert!(options.projection.is_none());
    }

    #[test]
    fn test_collection_argument_needs_a_database() {
        let err = Cli::try_parse_from(["mongoz", "get", "dummyCollection", "1"]).unwrap_err();
        assert!(err.to_string().contains("database.collection"));
    }

    #[rstest]
    #[case("mongodb://db1:27017,db2:27018/", vec!["db1:27017", "db2:27018"])]
    #[case("localhost:27017", vec!["localhost:27017"])]
    fn test_uri_selects_endpoints(#[case] uri: &str, #[case] expected: Vec<&str>) {
        let (_dir, store) = empty_store();

        let profile = select_profile(&store, None, Some(uri)).unwrap();

        assert_eq!(profile.endpoints, expected);
    }

    #[test]
    fn test_profile_selection_from_store() {
        let (_dir, store) = empty_store();
        assert_eq!(
            select_profile(&store, None, None).unwrap().endpoints,
            vec!["localhost:27017"]
        );

        let remote = ConnectionProfile::new(["db1:27017"]).with_label("remote");
        store.upsert(remote.clone()).unwrap();
        assert_eq!(select_profile(&store, None, None).unwrap(), remote);
        assert_eq!(select_profile(&store, Some("remote"), None).unwrap(), remote);
        assert!(select_profile(&store, Some("missing"), None).is_err());

        store
            .upsert(ConnectionProfile::localhost().with_label("local"))
            .unwrap();
        let err = select_profile(&store, None, None).unwrap_err();
        assert!(err.to_string().contains("--profile"));
    }

    #[test]
    fn test_parse_id_keeps_type() {
        assert_eq!(parse_id("42").unwrap(), Bson::Int32(42));
        assert_eq!(parse_id("\"42\"").unwrap(), Bson::String("42".to_string()));
        assert!(matches!(
            parse_id("ObjectId(\"5a1b2c3d4e5f60718293a4b5\")").unwrap(),
            Bson::ObjectId(_)
        ));
        assert!(parse_id("ObjectId(").is_err());
    }

    #[test]
    fn test_add_profile_fields() {
        let cli = Cli::try_parse_from([
            "mongoz",
            "add-profile",
            "--label",
            "replica",
            "--endpoints",
            "db1:27017, db2:27018",
            "--username",
            "admin",
            "--password",
            "secret",
            "--auth-mechanism",
            "SCRAM-SHA-1",
            "--ignore",
            "system.*, tmp",
        ])
        .unwrap();

        let Command::AddProfile(args) = cli.command else {
            panic!("expected add-profile");
        };
        let profile = args.into_fields().into_profile().unwrap();
        assert_eq!(profile.endpoints, vec!["db1:27017", "db2:27018"]);
        assert_eq!(profile.username.as_deref(), Some("admin"));
        assert_eq!(
            profile.auth_mechanism,
            mongoz_core::AuthMechanism::ScramSha1
        );
        assert!(profile.is_ignored("system.profile"));
        assert!(profile.is_ignored("tmp"));
    }
}

//! objectdesk: manage custom objects and their attributes from the terminal.
//!
//! Usage:
//!   objectdesk config set --workspace acme --project <project-id>
//!   objectdesk objects create --name Bug --description "Defects"
//!   objectdesk attributes add <object-id> select --name Severity
//!   objectdesk values set <issue-id> <object-id> <attribute-id> <option-id>

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use objectdesk_lib::custom_attributes::{
    AttributeForm, AttributeType, AttributeValues, FormContext, ObjectForm, SubmitOutcome,
};
use objectdesk_lib::error::ErrorReport;
use objectdesk_lib::state::{self, AppState};
use objectdesk_lib::types::{AttributePayload, NewAttribute};

#[derive(Parser, Debug)]
#[command(name = "objectdesk")]
#[command(about = "Custom objects and attributes for your workspace")]
struct Cli {
    /// Workspace slug (defaults to workspaceSlug in config.json)
    #[arg(short, long, global = true)]
    workspace: Option<String>,

    /// Project id (defaults to projectId in config.json)
    #[arg(short, long, global = true)]
    project: Option<String>,

    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the attribute types that can be added to an object
    Types,
    /// Create, edit and inspect objects
    #[command(subcommand)]
    Objects(ObjectsCommand),
    /// Add or remove attributes on an object
    #[command(subcommand)]
    Attributes(AttributesCommand),
    /// Read and write attribute values on an issue
    #[command(subcommand)]
    Values(ValuesCommand),
    /// Edit ~/.objectdesk/config.json
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug)]
enum ObjectsCommand {
    /// List the project's objects
    List,
    /// Create an object in the current project
    Create(ObjectFields),
    /// Change fields of an existing object
    Update {
        id: String,
        #[command(flatten)]
        fields: ObjectFields,
    },
    /// Show an object with its attributes
    Show { id: String },
    Delete { id: String },
}

#[derive(Args, Debug)]
struct ObjectFields {
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    description: Option<String>,
    /// Emoji code point, e.g. 1f41e
    #[arg(long)]
    icon: Option<String>,
}

#[derive(Subcommand, Debug)]
enum AttributesCommand {
    /// Add an attribute of the given type (see `objectdesk types`)
    Add {
        object: String,
        kind: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        required: bool,
    },
    Delete { object: String, attribute: String },
    /// Add an option to a select or multi-select attribute
    AddOption {
        object: String,
        attribute: String,
        name: String,
    },
}

#[derive(Subcommand, Debug)]
enum ValuesCommand {
    /// Show the values stored on an issue
    List { issue: String },
    /// Set the values of one attribute on an issue
    Set {
        issue: String,
        object: String,
        attribute: String,
        values: Vec<String>,
    },
    /// Change stored values, given as <value-id>=<value>
    Update {
        issue: String,
        #[arg(required = true)]
        changes: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    Set {
        #[arg(long)]
        base_url: Option<String>,
        #[arg(long)]
        token: Option<String>,
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let state = AppState::new().map_err(anyhow::Error::msg)?;

    let result = run(&cli, &state).await;
    if let Err(ref e) = result {
        if let Some(store_err) = e.downcast_ref::<objectdesk_lib::error::StoreError>() {
            let report = ErrorReport::from(store_err);
            eprintln!("hint: {}", report.recovery_suggestion);
        }
    }
    result
}

fn context(cli: &Cli, state: &AppState) -> FormContext {
    let config = state.current_config();
    FormContext {
        workspace: cli.workspace.clone().or(config.workspace_slug),
        project: cli.project.clone().or(config.project_id),
    }
}

fn require<'a>(value: &'a Option<String>, what: &str) -> Result<&'a str> {
    match value.as_deref().filter(|v| !v.is_empty()) {
        Some(v) => Ok(v),
        None => bail!("No {what} given. Pass --{what} or run `objectdesk config set`."),
    }
}

async fn run(cli: &Cli, state: &AppState) -> Result<()> {
    match &cli.command {
        Command::Types => {
            for kind in AttributeType::ALL {
                println!("{:<14} {}", kind.as_str(), kind.label());
            }
            Ok(())
        }
        Command::Objects(cmd) => objects(cli, state, cmd).await,
        Command::Attributes(cmd) => attributes(cli, state, cmd).await,
        Command::Values(cmd) => values(cli, state, cmd).await,
        Command::Config(cmd) => config(cli, state, cmd),
    }
}

async fn objects(cli: &Cli, state: &AppState, cmd: &ObjectsCommand) -> Result<()> {
    let ctx = context(cli, state);
    let workspace = require(&ctx.workspace, "workspace")?.to_string();
    let store = state.store.clone();

    match cmd {
        ObjectsCommand::List => {
            let project = require(&ctx.project, "project")?;
            store.fetch_entities(&workspace, project).await?;
            for entity in store.entities_for_project(project) {
                println!(
                    "{}  {}",
                    entity.id.unwrap_or_default(),
                    entity.display_name
                );
            }
        }
        ObjectsCommand::Create(fields) => {
            let mut form = ObjectForm::new(store, ctx.clone());
            apply_fields(&mut form, fields);
            match form.submit().await? {
                SubmitOutcome::Created(entity) | SubmitOutcome::Updated(entity) => {
                    println!("{}", serde_json::to_string_pretty(&entity)?)
                }
                SubmitOutcome::Skipped => bail!("Nothing to create: a project is required"),
            }
        }
        ObjectsCommand::Update { id, fields } => {
            let mut form = ObjectForm::open_existing(store, ctx.clone(), id);
            form.load_details().await?;
            apply_fields(&mut form, fields);
            match form.submit().await? {
                SubmitOutcome::Skipped => println!("No changes"),
                SubmitOutcome::Created(entity) | SubmitOutcome::Updated(entity) => {
                    println!("{}", serde_json::to_string_pretty(&entity)?)
                }
            }
        }
        ObjectsCommand::Show { id } => {
            let details = store.fetch_entity_details(&workspace, id).await?;
            println!("{}", serde_json::to_string_pretty(&details.entity)?);
            for attribute in &details.children {
                let form = AttributeForm::for_attribute(attribute);
                let names: Vec<&str> = form.fields().iter().map(|f| f.name).collect();
                println!(
                    "  {}  {:<14} {}  [{}]",
                    attribute.id,
                    attribute.kind.as_str(),
                    attribute.display_name,
                    names.join(", ")
                );
            }
        }
        ObjectsCommand::Delete { id } => {
            store.fetch_entity_details(&workspace, id).await?;
            store.delete_entity(&workspace, id).await?;
            println!("Deleted {id}");
        }
    }
    Ok(())
}

fn apply_fields(form: &mut ObjectForm, fields: &ObjectFields) {
    if let Some(ref name) = fields.name {
        form.set_display_name(name.as_str());
    }
    if let Some(ref description) = fields.description {
        form.set_description(description.as_str());
    }
    if let Some(ref icon) = fields.icon {
        form.set_icon(Some(icon.clone()));
    }
}

async fn attributes(cli: &Cli, state: &AppState, cmd: &AttributesCommand) -> Result<()> {
    let ctx = context(cli, state);
    let workspace = require(&ctx.workspace, "workspace")?.to_string();
    let store = state.store.clone();

    match cmd {
        AttributesCommand::Add {
            object,
            kind,
            name,
            required,
        } => {
            store
                .ensure_entity_details(&workspace, object)
                .await
                .with_context(|| format!("Could not load object {object}"))?;
            let overrides = AttributePayload {
                display_name: name.clone(),
                is_required: (*required).then_some(true),
                ..Default::default()
            };
            let request = NewAttribute::new(Some(object.as_str()), kind).with_overrides(overrides);
            let attribute = store.create_entity_attribute(&workspace, request).await?;
            println!("{}", serde_json::to_string_pretty(&attribute)?);
        }
        AttributesCommand::Delete { object, attribute } => {
            store.ensure_entity_details(&workspace, object).await?;
            store
                .delete_entity_attribute(&workspace, object, attribute)
                .await?;
            println!("Deleted attribute {attribute}");
        }
        AttributesCommand::AddOption {
            object,
            attribute,
            name,
        } => {
            store.ensure_entity_details(&workspace, object).await?;
            let option = store
                .create_attribute_option(&workspace, object, attribute, name)
                .await?;
            println!("{}  {}", option.id, option.display_name);
        }
    }
    Ok(())
}

async fn values(cli: &Cli, state: &AppState, cmd: &ValuesCommand) -> Result<()> {
    let ctx = context(cli, state);
    let workspace = require(&ctx.workspace, "workspace")?.to_string();
    let project = require(&ctx.project, "project")?.to_string();
    let store = state.store.clone();

    match cmd {
        ValuesCommand::List { issue } => {
            for entry in store.fetch_attribute_values(&workspace, &project, issue).await? {
                for value in &entry.attribute_values {
                    println!(
                        "{}  {:<20} {}",
                        value.id.as_deref().unwrap_or("-"),
                        entry.attribute.display_name,
                        value.value
                    );
                }
            }
        }
        ValuesCommand::Set {
            issue,
            object,
            attribute,
            values,
        } => {
            store.ensure_entity_details(&workspace, object).await?;
            let Some(target) = store.attribute(object, attribute) else {
                bail!("Object {object} has no attribute {attribute}");
            };
            let refs: Vec<&str> = values.iter().map(String::as_str).collect();
            let mut submission = AttributeValues::new();
            submission.set(&target, &refs)?;
            let saved = store
                .submit_attribute_values(&workspace, &project, issue, &submission)
                .await?;
            println!("Saved {} values", saved.len());
        }
        ValuesCommand::Update { issue, changes } => {
            let mut updates = BTreeMap::new();
            for change in changes {
                let Some((id, value)) = change.split_once('=') else {
                    bail!("Expected <value-id>=<value>, got {change}");
                };
                updates.insert(id.to_string(), value.to_string());
            }
            store.fetch_attribute_values(&workspace, &project, issue).await?;
            let updated = store
                .update_attribute_values(&workspace, &project, issue, updates)
                .await?;
            println!("Updated {} values", updated.len());
        }
    }
    Ok(())
}

fn config(cli: &Cli, state: &AppState, cmd: &ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Show => {
            let mut config = state.current_config();
            if config.api_token.is_some() {
                config.api_token = Some("********".to_string());
            }
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigCommand::Set {
            base_url,
            token,
            timeout_secs,
        } => {
            let config = state::create_or_update_config(state, |c| {
                if let Some(ref url) = base_url {
                    c.api_base_url = url.clone();
                }
                if let Some(ref token) = token {
                    c.api_token = Some(token.clone());
                }
                if let Some(secs) = timeout_secs {
                    c.request_timeout_secs = *secs;
                }
                // Workspace and project come from the global flags.
                if cli.workspace.is_some() {
                    c.workspace_slug = cli.workspace.clone();
                }
                if cli.project.is_some() {
                    c.project_id = cli.project.clone();
                }
            })
            .map_err(anyhow::Error::msg)?;
            println!("Saved. Workspace: {}", config.workspace_slug.unwrap_or_default());
        }
    }
    Ok(())
}

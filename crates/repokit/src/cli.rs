//! The `repokit` command line: requests against a JSON dataset.
//!
//! Every command loads the dataset into a [`MemoryStore`](crate::MemoryStore),
//! runs through a fresh [`Session`] and prints JSON. Writes are not saved
//! back to the file.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::json;

use repokit_core::{Association, EntityRef, Error, Related, Value, entity};
use repokit_query::{
    Assignment, Condition, OrderBy, PageRequest, Predicate, QueryRequest, Store, parse_scalar,
};
use repokit_session::{BulkOptions, Session};

use crate::Dataset;

/// Page size when `--page` is given without `--size`.
pub const DEFAULT_PAGE_SIZE: u64 = 20;

#[derive(Debug, Parser)]
#[command(name = "repokit")]
#[command(about = "Query and bulk-update a JSON dataset through a repokit session", long_about = None)]
pub struct Cli {
    /// Dataset file: entity shapes plus seed records
    #[arg(long, value_name = "FILE")]
    pub data: PathBuf,

    /// Log at debug level instead of RUST_LOG
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Look up one instance by identity
    Get {
        entity: String,
        #[arg(value_parser = parse_value)]
        id: Value,
        /// Resolve an association and include it in the output
        #[arg(long)]
        fetch: Vec<String>,
    },
    /// List instances matching the filters
    Query {
        entity: String,
        #[command(flatten)]
        filter: FilterArgs,
        /// Sort key, `field` or `field:desc`
        #[arg(long, value_parser = parse_order)]
        sort: Vec<OrderBy>,
        /// Zero-based page number
        #[arg(long)]
        page: Option<u64>,
        /// Page size; returns totals from a count query
        #[arg(long, conflicts_with = "slice")]
        size: Option<u64>,
        /// Slice size; reports only whether another slice follows
        #[arg(long)]
        slice: Option<u64>,
        /// Load an association in the same read
        #[arg(long)]
        fetch: Vec<String>,
    },
    /// Count instances matching the filters
    Count {
        entity: String,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Update every stored row matching the filters
    BulkUpdate {
        entity: String,
        #[command(flatten)]
        filter: FilterArgs,
        /// `field=value` or `field+=delta`
        #[arg(long = "set", required = true, value_parser = parse_assignment)]
        assignments: Vec<Assignment>,
    },
}

#[derive(Debug, Clone, Args)]
pub struct FilterArgs {
    /// Condition `field<op>value`; op is one of = != < <= > >= ~
    #[arg(long = "where", value_name = "FIELD<OP>VALUE", value_parser = parse_condition)]
    pub conditions: Vec<Condition>,
}

impl FilterArgs {
    pub fn predicate(&self) -> Predicate {
        self.conditions.iter().cloned().collect()
    }
}

fn parse_value(raw: &str) -> std::result::Result<Value, String> {
    Ok(parse_scalar(raw))
}

fn parse_order(raw: &str) -> std::result::Result<OrderBy, String> {
    OrderBy::parse(raw).ok_or_else(|| format!("expected `field` or `field:asc|desc`, got '{raw}'"))
}

fn parse_condition(raw: &str) -> std::result::Result<Condition, String> {
    Condition::parse(raw).ok_or_else(|| format!("expected `field<op>value`, got '{raw}'"))
}

fn parse_assignment(raw: &str) -> std::result::Result<Assignment, String> {
    Assignment::parse(raw).ok_or_else(|| format!("expected `field=value` or `field+=delta`, got '{raw}'"))
}

/// Load the dataset and run the command against a fresh session.
pub fn run(cli: &Cli) -> Result<serde_json::Value> {
    let raw = fs::read_to_string(&cli.data)
        .with_context(|| format!("reading dataset {}", cli.data.display()))?;
    let (registry, store) = Dataset::from_json(&raw)
        .and_then(Dataset::into_store)
        .with_context(|| format!("loading dataset {}", cli.data.display()))?;
    let mut session = Session::new(store, registry);
    execute(&mut session, &cli.command)
}

/// Run one command and render its result as JSON.
pub fn execute<S: Store>(session: &mut Session<S>, command: &Command) -> Result<serde_json::Value> {
    match command {
        Command::Get { entity, id, fetch } => {
            let found = session
                .find(entity, id.clone())
                .with_context(|| format!("get {entity} {id}"))?;
            let Some(found) = found else {
                return Ok(serde_json::Value::Null);
            };
            for association in fetch {
                session
                    .resolve(&found, association)
                    .with_context(|| format!("resolve {entity}.{association}"))?;
            }
            Ok(entity_json(&found, fetch))
        }
        Command::Query {
            entity,
            filter,
            sort,
            page,
            size,
            slice,
            fetch,
        } => {
            let mut request = QueryRequest::new(entity).predicate(filter.predicate());
            for key in sort {
                request = request.order_by(key.clone());
            }
            for association in fetch {
                request = request.fetch(association.clone());
            }
            let context = format!("query {} where {}", entity, request.get_predicate());

            if let Some(slice_size) = slice {
                let request = request.page(&PageRequest::of(page.unwrap_or(0), *slice_size));
                let slice = session.slice(&request).context(context)?;
                return Ok(json!({
                    "content": entities_json(slice.content(), fetch),
                    "slice": serde_json::to_value(slice.info())?,
                }));
            }
            if page.is_some() || size.is_some() {
                let window = PageRequest::of(page.unwrap_or(0), size.unwrap_or(DEFAULT_PAGE_SIZE));
                let request = request.page(&window);
                let page = session.page(&request).context(context)?;
                return Ok(json!({
                    "content": entities_json(page.content(), fetch),
                    "page": serde_json::to_value(page.info())?,
                }));
            }
            let found = session.query(&request).context(context)?;
            Ok(entities_json(&found, fetch))
        }
        Command::Count { entity, filter } => {
            let predicate = filter.predicate();
            let count = session
                .count(&QueryRequest::new(entity).predicate(predicate.clone()))
                .with_context(|| format!("count {entity} where {predicate}"))?;
            Ok(json!({ "count": count }))
        }
        Command::BulkUpdate {
            entity,
            filter,
            assignments,
        } => {
            let predicate = filter.predicate();
            let affected = session
                .bulk_update(entity, &predicate, assignments, BulkOptions::default())
                .with_context(|| format!("bulk-update {entity} where {predicate}"))?;
            Ok(json!({ "affected": affected }))
        }
    }
}

/// One-line failure report: `error[<kind>]: <request>: <cause>`.
pub fn report(err: &anyhow::Error) -> String {
    let kind = err
        .downcast_ref::<Error>()
        .map_or("Cli", |e| e.kind().as_str());
    format!("error[{kind}]: {err:#}")
}

fn entities_json(found: &[EntityRef], associations: &[String]) -> serde_json::Value {
    serde_json::Value::Array(found.iter().map(|e| entity_json(e, associations)).collect())
}

fn entity_json(instance: &EntityRef, associations: &[String]) -> serde_json::Value {
    let guard = entity::read(instance);
    let mut out = guard.to_json();
    if let serde_json::Value::Object(map) = &mut out {
        for name in associations {
            if let Some(related) = guard.association(name).and_then(Association::get) {
                map.insert(name.clone(), related_json(related));
            }
        }
    }
    out
}

fn related_json(related: &Related) -> serde_json::Value {
    match related {
        Related::One(target) => target
            .as_ref()
            .map_or(serde_json::Value::Null, |t| entity::read(t).to_json()),
        Related::Many(targets) => {
            serde_json::Value::Array(targets.iter().map(|t| entity::read(t).to_json()).collect())
        }
    }
}

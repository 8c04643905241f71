//! TreeGrid Demo - Main Entry Point
//!
//! Runs a tree grid inside a session actor and feeds it client turns, either
//! from a JSON-lines script (one turn per line, a message or an array of
//! messages) or from a built-in walkthrough. Responses are printed to
//! stdout as JSON lines; logs go to stderr.
//!
//! Usage: `treegrid-demo [--config <file>] [--script <file>|-] [--schema]`

use anyhow::{Context, Result, bail};
use schemars::schema_for;
use serde_json::json;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use treegrid::communication::UpdateBatch;
use treegrid::config::{self, AppConfig, GridConfig};
use treegrid::data::{GridItem, TreeData, TreeDataProvider};
use treegrid::grid::{Column, Grid, GridSortOrder, Renderer};
use treegrid::selection::SelectionMode;
use treegrid::session::{
    ClientCall, ClientMessage, ClientResponse, ComponentId, SessionHandle,
};

#[derive(Debug, Clone, PartialEq)]
struct Node {
    id: u32,
    name: String,
    load: u32,
}

impl GridItem for Node {
    type Id = u32;

    fn id(&self) -> u32 {
        self.id
    }
}

#[derive(Default)]
struct Args {
    config: Option<PathBuf>,
    script: Option<String>,
    schema: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args::default();
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => args.config = Some(iter.next().context("--config needs a path")?.into()),
            "--script" => args.script = Some(iter.next().context("--script needs a path or -")?),
            "--schema" => args.schema = true,
            other => bail!("Unknown argument: {other}"),
        }
    }
    Ok(args)
}

fn load_config(path: Option<&PathBuf>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => config::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => config::load_or_default().context("Failed to load config")?,
    };
    Ok(config)
}

fn print_schemas() -> Result<()> {
    let schemas = json!({
        "config": schema_for!(AppConfig),
        "clientMessage": schema_for!(ClientMessage),
        "clientResponse": schema_for!(ClientResponse),
    });
    println!("{}", serde_json::to_string_pretty(&schemas)?);
    Ok(())
}

/// Three regions, three sites each, two machines per site
fn sample_tree() -> Result<TreeData<Node>> {
    let mut data = TreeData::new();
    let mut next_id = 0;
    let mut node = |name: String, load: u32| {
        next_id += 1;
        Node {
            id: next_id,
            name,
            load,
        }
    };
    for (r, region) in ["north", "south", "west"].into_iter().enumerate() {
        let region_node = node(region.to_string(), 0);
        data.add_item(None, region_node.clone())?;
        for s in 0..3u32 {
            let site = node(format!("{region}-site-{s}"), 0);
            data.add_item(Some(&region_node), site.clone())?;
            for m in 0..2u32 {
                let load = (r as u32 * 31 + s * 17 + m * 7) % 100;
                data.add_item(Some(&site), node(format!("{region}-{s}-m{m}"), load))?;
            }
        }
    }
    Ok(data)
}

fn build_grid(config: GridConfig) -> Result<Grid<Node>> {
    let mut grid = Grid::new(TreeDataProvider::new(sample_tree()?), config);
    grid.add_column(Column::text("name", |n: &Node| n.name.clone()).with_header("Name"))?;
    grid.add_column(
        Column::new(
            "load",
            Renderer::template("<meter value=\"[[item.load_value]]\" max=\"100\">")
                .with_property("value", |n: &Node| json!(n.load)),
        )
        .with_header("Load")
        .with_comparator(|a: &Node, b: &Node| a.load.cmp(&b.load)),
    )?;
    grid.add_row_decorator("status", |n: &Node| {
        let mut fields = treegrid::communication::RowFields::new();
        if n.load > 80 {
            fields.insert("className".into(), json!("hot"));
        }
        fields
    })?;
    grid.set_selection_mode(SelectionMode::Multi);
    Ok(grid)
}

fn print_response(response: &ClientResponse) -> Result<()> {
    println!("{}", serde_json::to_string(response)?);
    Ok(())
}

fn first_batch(response: &ClientResponse, id: ComponentId) -> Option<&UpdateBatch> {
    response.for_component(id).next()
}

fn key_at(response: &ClientResponse, id: ComponentId, index: usize) -> Option<String> {
    first_batch(response, id)?
        .rows()
        .find(|(at, _)| *at == index)
        .map(|(_, row)| row.key.clone())
}

fn confirm(response: &ClientResponse, id: ComponentId) -> Vec<ClientMessage> {
    first_batch(response, id)
        .map(|batch| {
            vec![ClientMessage::new(
                id,
                ClientCall::ConfirmUpdate {
                    update_id: batch.update_id,
                },
            )]
        })
        .unwrap_or_default()
}

/// Scroll, expand, select and sort like a client would
fn run_walkthrough(handle: &SessionHandle, id: ComponentId) -> Result<()> {
    let message = |call| ClientMessage::new(id, call);

    // two range requests in one turn, only the second is served
    let response = handle.send(vec![
        message(ClientCall::SetRequestedRange { start: 5, length: 10 }),
        message(ClientCall::SetRequestedRange { start: 0, length: 20 }),
    ])?;
    print_response(&response)?;

    let north = key_at(&response, id, 0).context("first row missing")?;
    let mut turn = confirm(&response, id);
    turn.push(message(ClientCall::ToggleExpand { key: north }));
    let response = handle.send(turn)?;
    print_response(&response)?;

    let site = key_at(&response, id, 1).context("second row missing")?;
    let mut turn = confirm(&response, id);
    turn.push(message(ClientCall::ToggleExpand { key: site.clone() }));
    turn.push(message(ClientCall::Select { key: site }));
    let response = handle.send(turn)?;
    print_response(&response)?;

    let mut turn = confirm(&response, id);
    turn.push(message(ClientCall::SortersChanged {
        sorters: vec![GridSortOrder::desc("load")],
    }));
    let response = handle.send(turn)?;
    print_response(&response)?;

    // a stale key is dropped without failing the turn
    let response = handle.send(vec![message(ClientCall::Select {
        key: "no-such-key".into(),
    })])?;
    print_response(&response)?;
    Ok(())
}

fn run_script(handle: &SessionHandle, source: &str) -> Result<()> {
    let reader: Box<dyn BufRead> = if source == "-" {
        Box::new(BufReader::new(std::io::stdin()))
    } else {
        let file = std::fs::File::open(source)
            .with_context(|| format!("Failed to open script {source}"))?;
        Box::new(BufReader::new(file))
    };
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let messages: Vec<ClientMessage> = if line.starts_with('[') {
            serde_json::from_str(line)
        } else {
            serde_json::from_str(line).map(|message| vec![message])
        }
        .with_context(|| format!("Invalid message on line {}", number + 1))?;
        print_response(&handle.send(messages)?)?;
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = parse_args()?;
    if args.schema {
        return print_schemas();
    }
    let config = load_config(args.config.as_ref())?;

    // Initialize tracing for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Starting TreeGrid demo...");

    let handle = SessionHandle::spawn(config.session.clone())?;
    let grid = build_grid(config.grid.clone())?;
    let columns = grid.column_infos();
    let id = handle.access(move |session| session.add(grid))?;
    println!("{}", json!({ "component": id, "columns": columns }));

    match args.script.as_deref() {
        Some(source) => run_script(&handle, source)?,
        None => run_walkthrough(&handle, id)?,
    }

    let stats = handle.access(|session| session.stats().clone())?;
    tracing::info!(
        "Served {} turn(s), {} message(s), {} dropped call(s)",
        stats.turns,
        stats.messages,
        stats.dropped_calls
    );
    handle.shutdown()?;
    Ok(())
}

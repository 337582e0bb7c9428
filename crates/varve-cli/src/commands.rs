use std::fs;

use anyhow::Context;
use colored::Colorize;
use serde::Serialize;

use varve_codec::ExportRecord;
use varve_store::{StateDiff, Store};
use varve_types::{
    ChangeRecord, ElementKind, MapKeyKind, Operation, PropSchema, PropertyKind, Schema,
    TypeDescriptor,
};

use crate::cli::*;
use crate::script;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Validate(args) => cmd_validate(args, cli.format),
        Command::Run(args) => cmd_run(args, cli.format),
        Command::Export(args) => cmd_export(args),
    }
}

#[derive(Serialize)]
struct SchemaReport {
    types: Vec<TypeReport>,
}

#[derive(Serialize)]
struct TypeReport {
    name: String,
    properties: Vec<PropReport>,
}

#[derive(Serialize)]
struct PropReport {
    name: String,
    kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    inverse: Option<String>,
}

fn cmd_validate(args: ValidateArgs, format: OutputFormat) -> anyhow::Result<()> {
    let store = load_store(&args.schema)?;
    let schema = store.schema();
    match format {
        OutputFormat::Json => {
            let report = SchemaReport {
                types: schema
                    .types()
                    .map(|(_, ty)| TypeReport {
                        name: ty.name.clone(),
                        properties: ty
                            .props()
                            .map(|(_, prop)| PropReport {
                                name: prop.name.clone(),
                                kind: kind_label(&prop.kind),
                                inverse: inverse_label(schema, prop),
                            })
                            .collect(),
                    })
                    .collect(),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => {
            let props: usize = schema.types().map(|(_, ty)| ty.prop_count()).sum();
            println!(
                "{} {} compiled: {} types, {} properties",
                "✓".green().bold(),
                args.schema.bold(),
                schema.type_count(),
                props
            );
            for (_, ty) in schema.types() {
                println!("  {}", ty.name.cyan().bold());
                for (_, prop) in ty.props() {
                    match inverse_label(schema, prop) {
                        Some(inverse) => println!(
                            "    {}: {}  {}",
                            prop.name,
                            kind_label(&prop.kind),
                            format!("↔ {inverse}").dimmed()
                        ),
                        None => println!("    {}: {}", prop.name, kind_label(&prop.kind)),
                    }
                }
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct RunReport {
    operations: usize,
    states: Vec<StateReport>,
    entities: usize,
    cursor: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    diff: Option<StateDiff>,
    export: Vec<ExportRecord>,
}

#[derive(Serialize)]
struct StateReport {
    index: usize,
    stamp: u64,
    changes: Vec<ChangeRecord>,
}

fn cmd_run(args: RunArgs, format: OutputFormat) -> anyhow::Result<()> {
    let mut store = load_store(&args.schema)?;
    let ops = script::parse(&read_file(&args.script)?)?;
    script::run(&mut store, &ops)?;
    let records = varve_codec::export_all(store.view())?;
    let diff = if args.diff {
        Some(store.diff_states(0, store.cursor())?)
    } else {
        None
    };
    match format {
        OutputFormat::Json => {
            let states = (1..store.state_count())
                .map(|index| -> anyhow::Result<StateReport> {
                    let view = store.state_at(index)?;
                    Ok(StateReport {
                        index,
                        stamp: view.stamp().value(),
                        changes: view.changes().to_vec(),
                    })
                })
                .collect::<anyhow::Result<_>>()?;
            let report = RunReport {
                operations: ops.len(),
                states,
                entities: store.entity_count(),
                cursor: store.cursor(),
                diff,
                export: records,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => {
            for index in 1..store.state_count() {
                let view = store.state_at(index)?;
                let marker = if index == store.cursor() {
                    "*".yellow()
                } else {
                    " ".normal()
                };
                println!(
                    "{} {}  {}",
                    marker,
                    format!("state {index}").bold(),
                    format!("{} changes", view.changes().len()).dimmed()
                );
                for rec in view.changes() {
                    print_change(rec);
                }
            }
            if let Some(diff) = &diff {
                println!(
                    "  diff from genesis: {} added, {} removed, {} modified",
                    diff.added.len().to_string().green(),
                    diff.removed.len().to_string().red(),
                    diff.modified.len().to_string().yellow()
                );
            }
            println!(
                "{} Applied {} operations: {} states, {} entities, cursor at {}",
                "✓".green().bold(),
                ops.len(),
                store.state_count(),
                store.entity_count(),
                store.cursor().to_string().yellow()
            );
            println!("{}", varve_codec::to_json_string(&records)?);
        }
    }
    Ok(())
}

fn cmd_export(args: ExportArgs) -> anyhow::Result<()> {
    let mut store = load_store(&args.schema)?;
    let ops = script::parse(&read_file(&args.script)?)?;
    script::run(&mut store, &ops)?;
    let records = varve_codec::export_all(store.view())?;
    println!("{}", varve_codec::to_json_string(&records)?);
    Ok(())
}

fn print_change(rec: &ChangeRecord) {
    let op = match rec.op {
        Operation::Create => "create".green(),
        Operation::Update => "update".yellow(),
        Operation::Delete => "delete".red(),
    };
    let mut line = format!("{}({})", rec.type_name, rec.entity.short());
    if let Some(prop) = &rec.property {
        line.push('.');
        line.push_str(prop);
    }
    match rec.kind {
        Some(kind) => println!("    {op} {line} {}", format!("[{kind}]").dimmed()),
        None => println!("    {op} {line}"),
    }
}

fn kind_label(kind: &PropertyKind) -> String {
    match kind {
        PropertyKind::Scalar(k) => k.to_string(),
        PropertyKind::Reference(spec) => format!("ref {}", spec.target),
        PropertyKind::List(elem) => format!("list<{}>", element_label(elem)),
        PropertyKind::Set(elem) => format!("set<{}>", element_label(elem)),
        PropertyKind::Map { key, value } => {
            let key = match key {
                MapKeyKind::Str => "string",
                MapKeyKind::Id => "id",
            };
            format!("map<{key}, {}>", element_label(value))
        }
    }
}

fn element_label(elem: &ElementKind) -> String {
    match elem {
        ElementKind::Scalar(k) => k.to_string(),
        ElementKind::Reference(spec) => format!("ref {}", spec.target),
    }
}

fn inverse_label(schema: &Schema, prop: &PropSchema) -> Option<String> {
    let link = prop.inverse?;
    let target = schema.type_at(link.target_type);
    Some(format!(
        "{}.{}",
        target.name,
        target.prop(link.target_prop).name
    ))
}

fn read_file(path: &str) -> anyhow::Result<String> {
    fs::read_to_string(path).with_context(|| format!("reading {path}"))
}

fn load_store(path: &str) -> anyhow::Result<Store> {
    let descriptors: Vec<TypeDescriptor> = serde_json::from_str(&read_file(path)?)
        .with_context(|| format!("parsing schema file {path}"))?;
    Store::from_descriptors(descriptors)
        .with_context(|| format!("compiling schema file {path}"))
}

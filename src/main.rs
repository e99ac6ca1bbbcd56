use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use palmdb::database::{Database, Entries};
use palmdb::registry::CodecRegistry;
use palmdb::{AppInfo, CategoryBlock, Payload};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "palmdb", about = "PalmOS database inspection CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show header metadata
    Info { input: PathBuf },
    /// List every entry with its index metadata
    List { input: PathBuf },
    /// Dump the parsed database as JSON
    Dump { input: PathBuf },
    /// Show the category table from the AppInfo block
    Categories { input: PathBuf },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let registry = CodecRegistry::with_builtins();

    match Cli::parse().command {
        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input } => {
            let db = Database::open(&input, &registry)?;
            println!("name:          {}", db.name);
            println!("creator:       {}", db.creator);
            println!("type:          {}", db.type_code);
            println!("handler:       {}", db.codec().name());
            println!(
                "mode:          {}",
                if db.attributes.resource { "resources" } else { "records" }
            );
            println!("version:       {}", db.version);
            println!("created:       {}", format_time(db.created));
            println!("modified:      {}", format_time(db.modified));
            println!("backed up:     {}", format_time(db.backed_up));
            println!("mod number:    {}", db.modification_number);
            println!("uid seed:      {}", db.unique_id_seed);
            println!("entries:       {}", db.entries.len());
            println!("app info:      {}", if db.app_info.is_some() { "present" } else { "absent" });
            println!("sort block:    {}", if db.sort_block.is_some() { "present" } else { "absent" });
        }

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { input } => {
            let db = Database::open(&input, &registry)?;
            match &db.entries {
                Entries::Records(records) => {
                    for record in records {
                        println!(
                            "record {:06x}  cat {:2}  [{}]  {}",
                            record.id,
                            record.category,
                            flag_string(record),
                            payload_summary(&record.payload),
                        );
                    }
                }
                Entries::Resources(resources) => {
                    for resource in resources {
                        println!(
                            "resource {} #{:<5}  {}",
                            resource.type_code,
                            resource.id,
                            payload_summary(&resource.payload),
                        );
                    }
                }
            }
        }

        // ── Dump ─────────────────────────────────────────────────────────────
        Commands::Dump { input } => {
            let db = Database::open(&input, &registry)?;
            let value = serde_json::json!({
                "name": db.name,
                "creator": db.creator,
                "type": db.type_code,
                "handler": db.codec().name(),
                "attributes": db.attributes,
                "version": db.version,
                "created": db.created,
                "modified": db.modified,
                "backed_up": db.backed_up,
                "modification_number": db.modification_number,
                "unique_id_seed": db.unique_id_seed,
                "app_info": db.app_info,
                "sort_block": db.sort_block,
                "entries": db.entries,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }

        // ── Categories ───────────────────────────────────────────────────────
        Commands::Categories { input } => {
            let db = Database::open(&input, &registry)?;
            let block = match &db.app_info {
                Some(AppInfo::Categories(block)) => block.clone(),
                Some(AppInfo::Raw(bytes)) => CategoryBlock::parse(bytes)?,
                None => {
                    println!("no AppInfo block");
                    return Ok(());
                }
            };
            for (i, slot) in block.slots.iter().enumerate() {
                if slot.name.is_empty() {
                    continue;
                }
                println!(
                    "slot {i:2}  id {:3}  {}{}",
                    slot.id,
                    slot.name,
                    if slot.renamed { "  (renamed)" } else { "" },
                );
            }
            println!("last unique id: {}", block.last_unique_id);
        }
    }
    Ok(())
}

fn format_time(secs: i64) -> String {
    match Utc.timestamp_opt(secs, 0) {
        chrono::LocalResult::Single(t) => t.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        _ => format!("({secs})"),
    }
}

fn flag_string(record: &palmdb::Record) -> String {
    let mut flags = String::new();
    for (set, c) in [
        (record.attributes.expunged, 'x'),
        (record.attributes.dirty, 'd'),
        (record.attributes.deleted, 'D'),
        (record.attributes.private, 'p'),
        (record.attributes.archived, 'a'),
    ] {
        flags.push(if set { c } else { '-' });
    }
    flags
}

fn payload_summary(payload: &Payload) -> String {
    match payload {
        Payload::Raw(bytes) => {
            let preview = &bytes[..bytes.len().min(8)];
            format!("raw {} bytes  {}", bytes.len(), hex::encode(preview))
        }
        Payload::Memo(memo) => {
            let first_line = memo.text.lines().next().unwrap_or("");
            format!("memo {:?}", first_line)
        }
        Payload::Event(event) => format!(
            "event {:04}-{:02}-{:02} {:?}",
            event.date.year,
            event.date.month,
            event.date.day,
            event.description.as_deref().unwrap_or(""),
        ),
    }
}

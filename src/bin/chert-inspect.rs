//! # Database Inspector
//!
//! Read-only command-line inspection of a database directory.
//!
//! ## Usage
//!
//! ```bash
//! # Aggregate statistics
//! chert-inspect ./index stats
//!
//! # Every indexed term with document and collection frequencies
//! chert-inspect ./index terms
//!
//! # One document's record data, termlist and values
//! chert-inspect ./index doc 42
//!
//! # User metadata keys and values
//! chert-inspect ./index metadata
//! ```

use std::env;

use chert::Database;
use eyre::{bail, Result};

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage();
        return Ok(());
    }
    if args[1] == "--version" {
        println!("chert-inspect {}", chert::VERSION);
        return Ok(());
    }

    let db = Database::open(&args[1])?;
    let command = args.get(2).map(String::as_str).unwrap_or("stats");

    match command {
        "stats" => {
            println!("UUID:           {}", db.get_uuid());
            println!("revision:       {}", db.get_revision_number());
            println!("documents:      {}", db.get_doccount());
            println!("last docid:     {}", db.get_lastdocid());
            println!("total doclen:   {}", db.get_total_length());
            println!("average doclen: {:.2}", db.get_avlength());
            println!("doclen bounds:  [{}, {}]", db.get_doclength_lower_bound(), db.get_doclength_upper_bound());
            println!("has positions:  {}", db.has_positions());
        }
        "terms" => {
            for (term, df, cf) in db.all_terms()? {
                println!("{}\tdf={}\tcf={}", display_bytes(&term), df, cf);
            }
        }
        "doc" => {
            let did: u32 = match args.get(3).and_then(|s| s.parse().ok()) {
                Some(did) => did,
                None => bail!("usage: chert-inspect <db_dir> doc <docid>"),
            };
            let doc = db.open_document(did)?;
            println!("docid {} ({} bytes of data)", did, doc.data().len());
            println!("data: {}", display_bytes(doc.data()));
            println!("doclen: {}", db.get_doclength(did)?);
            for (term, data) in doc.terms() {
                let positions: Vec<String> =
                    data.positions.iter().map(|p| p.to_string()).collect();
                println!(
                    "term {} wdf={} positions=[{}]",
                    display_bytes(term),
                    data.wdf,
                    positions.join(",")
                );
            }
            for (slot, value) in doc.values() {
                println!("value {}: {}", slot, display_bytes(value));
            }
        }
        "metadata" => {
            for key in db.metadata_keys()? {
                let value = db.get_metadata(&key)?;
                println!("{} = {}", display_bytes(&key), display_bytes(&value));
            }
        }
        other => {
            bail!("unknown command '{}'; try stats, terms, doc or metadata", other);
        }
    }
    Ok(())
}

fn display_bytes(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) if s.chars().all(|c| !c.is_control()) => s.to_owned(),
        _ => bytes.iter().map(|b| format!("\\x{:02x}", b)).collect(),
    }
}

fn print_usage() {
    println!("chert-inspect - read-only database inspection");
    println!();
    println!("Usage:");
    println!("  chert-inspect <db_dir> [stats|terms|doc <docid>|metadata]");
    println!();
    println!("Options:");
    println!("  -h, --help     Show this help");
    println!("  --version      Show version");
}

use std::path::PathBuf;

use crate::catalog::CollectionOptions;
use crate::service::{Backend, QueryResult};

pub enum Command {
    // Database & collection management
    InitDb { db_path: PathBuf },
    ColCreate { name: String, schema_json: Option<String> },
    ColDelete { name: String },
    ColList,
    // One-shot request envelope (programmatic)
    Query { request_json: String },
}

pub fn run(backend: &Backend, cmd: Command) -> Result<(), Box<dyn std::error::Error>> {
    match cmd {
        Command::InitDb { db_path } => {
            // Schema bootstrap runs when the store opens, so reaching this
            // point means the file and its tables exist.
            println!("initialized path={}", db_path.display());
            Ok(())
        }
        Command::ColCreate { name, schema_json } => {
            let mut options = CollectionOptions::default();
            if let Some(raw) = schema_json {
                options.schema = Some(serde_json::from_str(&raw)?);
            }
            let record = backend.catalog().create(&name, options)?;
            println!("created name={} id={}", record.name, record.id);
            Ok(())
        }
        Command::ColDelete { name } => {
            let removed = backend.catalog().delete(&name)?;
            println!("deleted={} name={}", removed, name);
            Ok(())
        }
        Command::ColList => {
            for record in backend.catalog().list()? {
                println!("{}", record.name);
            }
            Ok(())
        }
        Command::Query { request_json } => {
            let body: serde_json::Value = serde_json::from_str(&request_json)?;
            match backend.execute_json(&body)? {
                // Stream documents as NDJSON to stdout
                QueryResult::Documents(docs) => {
                    for doc in docs {
                        println!("{}", serde_json::to_string(&doc)?);
                    }
                }
                other => println!("{}", serde_json::to_string(&other)?),
            }
            Ok(())
        }
    }
}

//! Subcommand implementations.
//!
//! Each command takes an open [`Repository`] and writes its result to `out`,
//! so the same code serves the binary and the tests.

use std::io::Write;
use std::ops::Bound;

use anyhow::{bail, Context, Result};
use nova_store::{BackendKind, ByteKey, KeyRange, Repository, ScanOrder, StoreConfig};
use serde_json::json;

use crate::cli::{Commands, KeyArgs, PutArgs, ScanArgs, StoreArgs, TableArgs};

/// Turns command-line text into key/value bytes and back, and picks the
/// shape of printed results.
#[derive(Debug, Clone, Copy)]
pub struct Codec {
    pub hex: bool,
    pub json: bool,
}

impl Codec {
    pub fn from_args(args: &StoreArgs) -> Self {
        Codec {
            hex: args.hex,
            json: args.json,
        }
    }

    pub fn decode(&self, s: &str) -> Result<Vec<u8>> {
        if self.hex {
            hex::decode(s).with_context(|| format!("invalid hex: {s:?}"))
        } else {
            Ok(s.as_bytes().to_vec())
        }
    }

    pub fn encode(&self, bytes: &[u8]) -> String {
        if self.hex {
            hex::encode(bytes)
        } else {
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

/// Build the store config from the optional config file and flag overrides.
pub fn resolve_config(args: &StoreArgs) -> Result<StoreConfig> {
    let mut config = match &args.config {
        Some(path) => StoreConfig::from_json_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => StoreConfig::default(),
    };
    if let Some(name) = &args.backend {
        config.backend = match BackendKind::parse(name) {
            Some(kind) => kind,
            None => bail!("unknown backend {name:?} (expected memory, sled or rocksdb)"),
        };
    }
    if let Some(dir) = &args.data_dir {
        config.path = dir.clone();
    }
    Ok(config)
}

/// Run one subcommand against `repo`.
pub fn execute(repo: &Repository, command: &Commands, codec: Codec, out: &mut dyn Write) -> Result<()> {
    match command {
        Commands::Tables => tables(repo, codec, out),
        Commands::Get(args) => get(repo, args, codec, out),
        Commands::Put(args) => put(repo, args, codec),
        Commands::Delete(args) => delete(repo, args, codec),
        Commands::Scan(args) => scan(repo, args, codec, out),
        Commands::Count(args) => count(repo, args, codec, out),
        Commands::Clear(args) => clear(repo, args),
        Commands::Metrics => {
            out.write_all(repo.metrics().encode().as_bytes())?;
            Ok(())
        }
        Commands::Version => {
            writeln!(out, "nova-storectl {}", env!("CARGO_PKG_VERSION"))?;
            Ok(())
        }
    }
}

fn tables(repo: &Repository, codec: Codec, out: &mut dyn Write) -> Result<()> {
    if codec.json {
        let tables: Vec<_> = repo
            .tables()
            .into_iter()
            .map(|t| json!({ "name": t.name, "prefix": t.prefix }))
            .collect();
        writeln!(out, "{}", serde_json::Value::Array(tables))?;
        return Ok(());
    }
    for table in repo.tables() {
        writeln!(out, "{:>3}  {}", table.prefix, table.name)?;
    }
    Ok(())
}

fn get(repo: &Repository, args: &KeyArgs, codec: Codec, out: &mut dyn Write) -> Result<()> {
    let key = codec.decode(&args.key)?;
    let tx = repo.begin_read()?;
    match tx.select_raw(&args.table, &key)? {
        Some(value) if codec.json => writeln!(
            out,
            "{}",
            json!({ "key": args.key, "value": codec.encode(&value) })
        )?,
        Some(value) => writeln!(out, "{}", codec.encode(&value))?,
        None => bail!("key {:?} not found in table {:?}", args.key, args.table),
    }
    Ok(())
}

fn put(repo: &Repository, args: &PutArgs, codec: Codec) -> Result<()> {
    let key = codec.decode(&args.key)?;
    let value = codec.decode(&args.value)?;
    let mut tx = repo.begin_write()?;
    tx.insert_raw(&args.table, &key, &value)?;
    tx.commit()?;
    tracing::info!(table = %args.table, key = %args.key, "row written");
    Ok(())
}

fn delete(repo: &Repository, args: &KeyArgs, codec: Codec) -> Result<()> {
    let key = codec.decode(&args.key)?;
    let mut tx = repo.begin_write()?;
    if !tx.exists_raw(&args.table, &key)? {
        bail!("key {:?} not found in table {:?}", args.key, args.table);
    }
    tx.remove_raw(&args.table, &key)?;
    tx.commit()?;
    tracing::info!(table = %args.table, key = %args.key, "row deleted");
    Ok(())
}

fn scan(repo: &Repository, args: &ScanArgs, codec: Codec, out: &mut dyn Write) -> Result<()> {
    let bound = |key: &Option<String>, exclusive: bool| -> Result<Bound<ByteKey>> {
        Ok(match key {
            None => Bound::Unbounded,
            Some(k) if exclusive => Bound::Excluded(codec.decode(k)?.into()),
            Some(k) => Bound::Included(codec.decode(k)?.into()),
        })
    };
    let range = KeyRange {
        start: bound(&args.from, args.exclusive_from)?,
        end: bound(&args.to, args.exclusive_to)?,
    };
    let order = if args.reverse {
        ScanOrder::Descending
    } else {
        ScanOrder::Ascending
    };

    let tx = repo.begin_read()?;
    let rows = tx.select_range(&args.table, &range, order, args.keys_only)?;
    for row in rows.take(args.limit.unwrap_or(usize::MAX)) {
        let row = row?;
        if codec.json {
            let value = row.value.as_deref().map(|v| codec.encode(v));
            writeln!(out, "{}", json!({ "key": codec.encode(&row.key), "value": value }))?;
            continue;
        }
        match &row.value {
            Some(value) => writeln!(out, "{}\t{}", codec.encode(&row.key), codec.encode(value))?,
            None => writeln!(out, "{}", codec.encode(&row.key))?,
        }
    }
    Ok(())
}

fn count(repo: &Repository, args: &TableArgs, codec: Codec, out: &mut dyn Write) -> Result<()> {
    let tx = repo.begin_read()?;
    let rows = tx.count(&args.table)?;
    if codec.json {
        writeln!(out, "{}", json!({ "table": args.table, "rows": rows }))?;
    } else {
        writeln!(out, "{rows}")?;
    }
    Ok(())
}

fn clear(repo: &Repository, args: &TableArgs) -> Result<()> {
    if repo.table(&args.table).is_none() {
        bail!("table {:?} does not exist", args.table);
    }
    let mut tx = repo.begin_write()?;
    let removed = tx.count(&args.table)?;
    tx.remove_all_keys(&args.table)?;
    tx.commit()?;
    tracing::info!(table = %args.table, removed, "table cleared");
    Ok(())
}

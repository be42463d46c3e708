use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::common::TableId;
use crate::error::{DbError, Result};
use crate::storage::heap_file::HeapFile;
use crate::tuple::desc::{TdItem, TupleDesc};
use crate::tuple::field::Type;

/// Maps table names to ids and ids to their backing heap files. Tables can be
/// registered programmatically or loaded from a schema file with one line per
/// table:
///
/// ```text
/// users (id int, name string)
/// ```
///
/// Each table is backed by `<data_dir>/<name>.dat`, created when absent.
pub struct Catalog {
    data_dir: PathBuf,
    next_table_id: AtomicU32,
    table_name_to_id: DashMap<String, TableId>,
    tables: DashMap<TableId, Arc<HeapFile>>,
}

impl Catalog {
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        if !data_dir.is_dir() {
            fs::create_dir_all(&data_dir)?;
        }
        Ok(Self {
            data_dir,
            next_table_id: AtomicU32::new(1),
            table_name_to_id: DashMap::new(),
            tables: DashMap::new(),
        })
    }

    /// Registers a table, creating its backing file if needed. Returns the
    /// freshly minted table id.
    pub fn add_table(&self, name: &str, desc: TupleDesc) -> Result<TableId> {
        if self.table_name_to_id.contains_key(name) {
            return Err(DbError::Db(format!("table {name} already exists")));
        }
        let id = self.next_table_id.fetch_add(1, Ordering::Relaxed);
        let path = self.data_dir.join(format!("{name}.dat"));
        let file = HeapFile::new(id, path, desc)?;
        self.tables.insert(id, Arc::new(file));
        self.table_name_to_id.insert(name.to_owned(), id);
        Ok(id)
    }

    pub fn table(&self, id: TableId) -> Result<Arc<HeapFile>> {
        self.tables
            .get(&id)
            .map(|kv| Arc::clone(kv.value()))
            .ok_or_else(|| DbError::NoSuchElement(format!("no table with id {id}")))
    }

    pub fn table_id(&self, name: &str) -> Result<TableId> {
        self.table_name_to_id
            .get(name)
            .map(|kv| *kv.value())
            .ok_or_else(|| DbError::NoSuchElement(format!("no table named {name}")))
    }

    pub fn tuple_desc(&self, id: TableId) -> Result<TupleDesc> {
        Ok(self.table(id)?.desc().clone())
    }

    pub fn list_tables(&self) -> Vec<String> {
        self.table_name_to_id
            .iter()
            .map(|kv| kv.key().to_owned())
            .collect()
    }

    /// Loads a line-oriented schema file. Blank lines and `#` comments are
    /// skipped.
    pub fn load_schema(&self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        let content = fs::read_to_string(&path)?;
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (name, desc) = parse_schema_line(line)?;
            self.add_table(&name, desc)?;
        }
        Ok(())
    }
}

fn parse_schema_line(line: &str) -> Result<(String, TupleDesc)> {
    let bad = || DbError::Db(format!("malformed schema line: {line}"));

    let open = line.find('(').ok_or_else(bad)?;
    let close = line.rfind(')').ok_or_else(bad)?;
    let name = line[..open].trim();
    if name.is_empty() || close < open {
        return Err(bad());
    }

    let mut items = Vec::new();
    for column in line[open + 1..close].split(',') {
        let mut parts = column.split_whitespace();
        let column_name = parts.next().ok_or_else(bad)?;
        let column_type = match parts.next() {
            Some("int") => Type::Int,
            Some("string") => Type::Str,
            _ => return Err(bad()),
        };
        items.push(TdItem::new(column_type, Some(column_name.to_owned())));
    }
    if items.is_empty() {
        return Err(bad());
    }

    Ok((name.to_owned(), TupleDesc::new(items)))
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use tempfile::tempdir;

    use super::Catalog;
    use crate::tuple::desc::TupleDesc;
    use crate::tuple::field::Type;

    #[test]
    fn registers_and_resolves_tables() -> Result<()> {
        let dir = tempdir()?;
        let catalog = Catalog::new(dir.path())?;

        let desc = TupleDesc::named(vec![(Type::Int, "id"), (Type::Str, "name")]);
        let id = catalog.add_table("users", desc.clone())?;

        assert_eq!(catalog.table_id("users")?, id);
        assert_eq!(catalog.tuple_desc(id)?, desc);
        assert_eq!(catalog.table(id)?.id(), id);
        assert!(catalog.table_id("missing").is_err());
        assert!(catalog.add_table("users", desc).is_err());
        Ok(())
    }

    #[test]
    fn loads_schema_files() -> Result<()> {
        let dir = tempdir()?;
        let schema_path = dir.path().join("catalog.schema");
        std::fs::write(
            &schema_path,
            "# tables\nusers (id int, name string)\n\norders (id int, user_id int)\n",
        )?;

        let catalog = Catalog::new(dir.path())?;
        catalog.load_schema(&schema_path)?;

        let mut tables = catalog.list_tables();
        tables.sort();
        assert_eq!(tables, vec!["orders", "users"]);

        let users = catalog.table(catalog.table_id("users")?)?;
        assert_eq!(users.desc().field_name(1)?, Some("name"));
        assert_eq!(users.desc().field_type(1)?, Type::Str);
        Ok(())
    }

    #[test]
    fn rejects_malformed_schema_lines() -> Result<()> {
        let dir = tempdir()?;
        let schema_path = dir.path().join("catalog.schema");
        std::fs::write(&schema_path, "users id int\n")?;

        let catalog = Catalog::new(dir.path())?;
        assert!(catalog.load_schema(&schema_path).is_err());
        Ok(())
    }
}

use std::path::PathBuf;

use crate::buffer::buffer_pool::BufferPool;
use crate::catalog::Catalog;
use crate::common::DEFAULT_PAGES;
use crate::error::Result;
use crate::log::LogFile;

pub struct DbConfig {
    pub data_dir: PathBuf,
    pub pool_size: usize,
    pub log_file: String,
}

impl DbConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            pool_size: DEFAULT_PAGES,
            log_file: "log.dat".to_owned(),
        }
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }
}

/// Everything a query needs to run: the catalog, the shared buffer pool and
/// the log. Threaded explicitly through files, operators and the transaction
/// driver instead of living in process-wide statics, so tests can spin up as
/// many independent engines as they like.
pub struct DbContext {
    catalog: Catalog,
    buffer_pool: BufferPool,
    log: LogFile,
}

impl DbContext {
    pub fn new(config: DbConfig) -> Result<Self> {
        let catalog = Catalog::new(&config.data_dir)?;
        let log = LogFile::open(config.data_dir.join(&config.log_file))?;
        Ok(Self {
            catalog,
            buffer_pool: BufferPool::new(config.pool_size),
            log,
        })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn buffer_pool(&self) -> &BufferPool {
        &self.buffer_pool
    }

    pub fn log(&self) -> &LogFile {
        &self.log
    }
}

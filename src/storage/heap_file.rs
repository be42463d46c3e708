use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::os::unix::prelude::FileExt;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::buffer::buffer_pool::PageRef;
use crate::common::{PageId, PageNo, TableId, PAGE_SIZE};
use crate::concurrency::{Permissions, TransactionId};
use crate::db::DbContext;
use crate::error::{DbError, Result};
use crate::storage::heap_page::HeapPage;
use crate::tuple::desc::TupleDesc;
use crate::tuple::Tuple;

/// A table file: an unordered sequence of fixed-size pages. Page access for
/// queries goes through the buffer pool; only raw reads and writes of page
/// images happen here. The append mutex keeps `num_pages` monotone when
/// several transactions extend the file at once.
pub struct HeapFile {
    id: TableId,
    file: File,
    desc: TupleDesc,
    append_lock: Mutex<()>,
}

impl HeapFile {
    pub fn new(id: TableId, path: impl AsRef<Path>, desc: TupleDesc) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        let size = file.metadata()?.len();
        if size % PAGE_SIZE as u64 != 0 {
            return Err(DbError::Db(format!(
                "table file {} is {} bytes, not a multiple of the page size",
                path.display(),
                size
            )));
        }

        Ok(Self {
            id,
            file,
            desc,
            append_lock: Mutex::new(()),
        })
    }

    pub fn id(&self) -> TableId {
        self.id
    }

    pub fn desc(&self) -> &TupleDesc {
        &self.desc
    }

    pub fn num_pages(&self) -> Result<PageNo> {
        let size = self.file.metadata()?.len();
        Ok((size / PAGE_SIZE as u64) as PageNo)
    }

    /// Reads the raw page image at `pid` and parses it.
    pub fn read_page(&self, pid: PageId) -> Result<HeapPage> {
        let offset = pid.1 as u64 * PAGE_SIZE as u64;
        if offset >= self.file.metadata()?.len() {
            return Err(DbError::Db(format!(
                "page {pid:?} is beyond the end of table file {}",
                self.id
            )));
        }
        let mut data = vec![0u8; PAGE_SIZE];
        self.file.read_exact_at(&mut data, offset)?;
        HeapPage::new(pid, &data, self.desc.clone())
    }

    /// Writes the page image back to its slot in the file.
    pub fn write_page(&self, page: &HeapPage) -> Result<()> {
        let offset = page.id().1 as u64 * PAGE_SIZE as u64;
        self.file.write_all_at(&page.page_data(), offset)?;
        self.file.sync_all()?;
        Ok(())
    }

    fn append_empty_page(&self, expected_pages: PageNo) -> Result<()> {
        let _append = self.append_lock.lock().unwrap();
        // someone else may have extended the file while we were scanning
        if self.num_pages()? == expected_pages {
            let offset = expected_pages as u64 * PAGE_SIZE as u64;
            self.file.write_all_at(&HeapPage::empty_page_data(), offset)?;
            self.file.sync_all()?;
        }
        Ok(())
    }

    /// Finds a page with a free slot, locking pages read-only while probing
    /// and re-acquiring with write intent for the actual insert. When every
    /// page is full the file grows by one zeroed page and the scan retries,
    /// so the new page obeys locking and rollback like any other.
    pub fn insert_tuple(
        &self,
        ctx: &DbContext,
        tid: TransactionId,
        tuple: &mut Tuple,
    ) -> Result<Vec<PageRef>> {
        loop {
            let num_pages = self.num_pages()?;
            for page_no in 0..num_pages {
                let pid = (self.id, page_no);
                let page = ctx.buffer_pool().get_page(ctx, tid, pid, Permissions::ReadOnly)?;
                let has_room = page.read().unwrap().num_empty_slots() > 0;
                if !has_room {
                    continue;
                }

                let page = ctx
                    .buffer_pool()
                    .get_page(ctx, tid, pid, Permissions::ReadWrite)?;
                let mut guard = page.write().unwrap();
                // the page may have filled up between probe and upgrade
                if guard.num_empty_slots() > 0 {
                    guard.insert_tuple(tuple)?;
                    drop(guard);
                    return Ok(vec![page]);
                }
            }

            self.append_empty_page(num_pages)?;
        }
    }

    /// Resolves the owning page from the tuple's record id and deletes it
    /// under a write lock.
    pub fn delete_tuple(
        &self,
        ctx: &DbContext,
        tid: TransactionId,
        tuple: &mut Tuple,
    ) -> Result<PageRef> {
        let (pid, _slot) = tuple
            .record_id()
            .ok_or_else(|| DbError::Db("tuple is not stored on any page".to_owned()))?;
        if pid.0 != self.id {
            return Err(DbError::Db(format!(
                "tuple belongs to table {}, not table {}",
                pid.0, self.id
            )));
        }

        let page = ctx
            .buffer_pool()
            .get_page(ctx, tid, pid, Permissions::ReadWrite)?;
        page.write().unwrap().delete_tuple(tuple)?;
        Ok(page)
    }

    /// An iterator over every tuple of the table, loading one page at a time
    /// through the buffer pool with read intent.
    pub fn iter(&self, ctx: Arc<DbContext>, tid: TransactionId) -> Result<HeapFileIterator> {
        Ok(HeapFileIterator {
            ctx,
            tid,
            table_id: self.id,
            num_pages: self.num_pages()?,
            next_page: 0,
            buffered: VecDeque::new(),
            open: false,
        })
    }
}

pub struct HeapFileIterator {
    ctx: Arc<DbContext>,
    tid: TransactionId,
    table_id: TableId,
    num_pages: PageNo,
    next_page: PageNo,
    buffered: VecDeque<Tuple>,
    open: bool,
}

impl HeapFileIterator {
    pub fn open(&mut self) {
        self.open = true;
        self.next_page = 0;
    }

    pub fn next(&mut self) -> Result<Option<Tuple>> {
        if !self.open {
            return Err(DbError::Db("heap file iterator is not open".to_owned()));
        }

        while self.buffered.is_empty() && self.next_page < self.num_pages {
            let pid = (self.table_id, self.next_page);
            let page =
                self.ctx
                    .buffer_pool()
                    .get_page(&self.ctx, self.tid, pid, Permissions::ReadOnly)?;
            self.buffered = page.read().unwrap().iter().cloned().collect();
            self.next_page += 1;
        }

        Ok(self.buffered.pop_front())
    }

    pub fn rewind(&mut self) -> Result<()> {
        self.close();
        self.open();
        Ok(())
    }

    pub fn close(&mut self) {
        self.buffered.clear();
        self.open = false;
    }
}

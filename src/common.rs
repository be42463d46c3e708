pub type TableId = u32;
pub type PageNo = u32;
pub type PageId = (TableId, PageNo);
pub type RecordId = (PageId, usize);

/// Bytes per page, including the slot header.
pub const PAGE_SIZE: usize = 4096;

/// Default capacity of the buffer pool, in pages.
pub const DEFAULT_PAGES: usize = 50;

/// Fixed payload width of a string field.
pub const STRING_LEN: usize = 128;

// kintone-mirror/src/sync/pager.rs
use crate::errors::{Result, SyncError};
use crate::kintone::{RecordApi, RecordPage};

/// Walks every record of one application with `limit/offset` queries.
///
/// The `totalCount` of the first page decides how many pages follow. The first
/// request is always made, so an empty application still costs one call.
/// Failed requests are not retried.
pub struct RecordPager<'a> {
    api: &'a dyn RecordApi,
    app_id: u64,
    page_size: u32,
    offset: u64,
    total_count: Option<u64>,
    pages: u32,
}

impl<'a> RecordPager<'a> {
    pub fn new(api: &'a dyn RecordApi, app_id: u64, page_size: u32) -> Self {
        Self {
            api,
            app_id,
            page_size,
            offset: 0,
            total_count: None,
            pages: 0,
        }
    }

    /// Total reported by the first page; `None` until it has been fetched.
    pub fn total_count(&self) -> Option<u64> {
        self.total_count
    }

    pub fn pages_fetched(&self) -> u32 {
        self.pages
    }

    /// Fetches the next page, or `None` once the offset reaches the first page's `totalCount`.
    pub async fn next_page(&mut self) -> Result<Option<RecordPage>> {
        if let Some(total) = self.total_count {
            if self.offset >= total {
                return Ok(None);
            }
        }

        let query = format!("limit {} offset {}", self.page_size, self.offset);
        let page = self.api.get_records(self.app_id, &query).await?;

        if self.total_count.is_none() {
            let total = page.total_count.ok_or(SyncError::MissingTotalCount {
                app_id: self.app_id,
            })?;
            self.total_count = Some(total);
        }
        self.offset += u64::from(self.page_size);
        self.pages += 1;

        Ok(Some(page))
    }
}

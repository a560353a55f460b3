//! Server-side cursors: batch iteration, `getMore`, `killCursors`.

use std::collections::VecDeque;

use crate::bson::{BsonValue, DocBuf, DocView};
use crate::client::Client;
use crate::error::{Error, Result};

/// An iteration handle over a query's result set.
///
/// Holds the current batch locally; when it runs dry and the server still
/// has documents (`cursor_id != 0`), the next call to [`next`](Cursor::next)
/// issues a `getMore`. Dropping a live cursor issues a best-effort
/// `killCursors` in the background.
pub struct Cursor {
    client: Client,
    db: String,
    collection: String,
    cursor_id: i64,
    batch: VecDeque<DocBuf>,
    batch_size: Option<i32>,
}

impl Cursor {
    /// Build a cursor from a `find`/`aggregate`-style reply containing a
    /// `cursor` subdocument.
    pub(crate) fn from_reply(
        client: Client,
        db: String,
        reply: &DocBuf,
        batch_size: Option<i32>,
    ) -> Result<Cursor> {
        let view = reply.as_view();
        let cursor_doc = view
            .get_doc("cursor")
            .ok_or_else(|| Error::Msg("reply is missing the cursor document".into()))?;
        let cursor_id = cursor_doc.get_i64("id").unwrap_or(0);
        let namespace = cursor_doc
            .get_str("ns")
            .ok_or_else(|| Error::Msg("cursor reply is missing its namespace".into()))?;
        let collection = namespace
            .split_once('.')
            .map(|(_, coll)| coll.to_string())
            .unwrap_or_else(|| namespace.to_string());
        let batch = cursor_doc
            .get_array("firstBatch")
            .map(collect_batch)
            .transpose()?
            .unwrap_or_default();
        tracing::debug!(cursor_id, namespace, batch = batch.len(), "opened cursor");
        Ok(Cursor {
            client,
            db,
            collection,
            cursor_id,
            batch,
            batch_size,
        })
    }

    pub fn cursor_id(&self) -> i64 {
        self.cursor_id
    }

    /// `true` once the server side is drained and the local batch is
    /// empty.
    pub fn is_exhausted(&self) -> bool {
        self.cursor_id == 0 && self.batch.is_empty()
    }

    /// The number of documents buffered locally.
    pub fn buffered(&self) -> usize {
        self.batch.len()
    }

    /// The next document, fetching another batch from the server when the
    /// local one is drained. `Ok(None)` means the cursor is exhausted.
    pub async fn next(&mut self) -> Result<Option<DocBuf>> {
        loop {
            if let Some(doc) = self.batch.pop_front() {
                return Ok(Some(doc));
            }
            if self.cursor_id == 0 {
                return Ok(None);
            }
            self.get_more().await?;
        }
    }

    /// Drain the cursor into a vector.
    pub async fn collect(mut self) -> Result<Vec<DocBuf>> {
        let mut out = Vec::new();
        while let Some(doc) = self.next().await? {
            out.push(doc);
        }
        Ok(out)
    }

    async fn get_more(&mut self) -> Result<()> {
        let mut body = DocBuf::new();
        {
            let mut m = body.mutate();
            m.append_int64("getMore", self.cursor_id)?;
            m.append_str("collection", &self.collection)?;
            if let Some(batch_size) = self.batch_size {
                m.append_int32("batchSize", batch_size)?;
            }
        }
        let reply = self.client.command(&self.db, body).await?;
        let view = reply.as_view();
        let cursor_doc = view
            .get_doc("cursor")
            .ok_or_else(|| Error::Msg("getMore reply is missing the cursor document".into()))?;
        self.cursor_id = cursor_doc.get_i64("id").unwrap_or(0);
        if let Some(batch) = cursor_doc.get_array("nextBatch") {
            self.batch = collect_batch(batch)?;
        }
        tracing::trace!(
            cursor_id = self.cursor_id,
            batch = self.batch.len(),
            "fetched batch"
        );
        Ok(())
    }

    /// Close the server side of the cursor eagerly.
    pub async fn kill(&mut self) -> Result<()> {
        let Some(body) = kill_cursors_doc(&self.collection, self.cursor_id)? else {
            return Ok(());
        };
        self.cursor_id = 0;
        self.batch.clear();
        self.client.command(&self.db, body).await?;
        Ok(())
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        if self.cursor_id == 0 {
            return;
        }
        // Best effort: close the server side without blocking the drop.
        let Ok(Some(body)) = kill_cursors_doc(&self.collection, self.cursor_id) else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(cursor_id = self.cursor_id, "leaking cursor: no runtime");
            return;
        };
        let client = self.client.clone();
        let db = std::mem::take(&mut self.db);
        let cursor_id = self.cursor_id;
        handle.spawn(async move {
            if let Err(err) = client.command(&db, body).await {
                tracing::debug!(cursor_id, error = %err, "killCursors failed");
            }
        });
    }
}

fn collect_batch(batch: DocView<'_>) -> Result<VecDeque<DocBuf>> {
    let mut out = VecDeque::new();
    for el in batch.iter() {
        let el = el?;
        match el.value()? {
            BsonValue::Document(doc) => out.push_back(doc.to_owned_doc()),
            _ => return Err(Error::Msg("cursor batch holds a non-document".into())),
        }
    }
    Ok(out)
}

fn kill_cursors_doc(collection: &str, cursor_id: i64) -> Result<Option<DocBuf>> {
    if cursor_id == 0 {
        return Ok(None);
    }
    let mut body = DocBuf::new();
    {
        let mut m = body.mutate();
        m.append_str("killCursors", collection)?;
        let pos = m.append_array("cursors", DocView::empty())?;
        let mut ids = m.child_at(pos)?;
        ids.append_int64("0", cursor_id)?;
    }
    Ok(Some(body))
}

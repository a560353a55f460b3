//! A thin CRUD surface over [`Client::command`].
//!
//! Command documents are assembled with the mutator and parsed back with
//! the view layer; nothing here touches the wire directly.

use crate::bson::{DocBuf, DocView, ObjectId};
use crate::client::Client;
use crate::cursor::Cursor;
use crate::error::{Error, Result};
use crate::status::{ClientErrorCode, ServerErrorCode, Status};

/// Options for [`Collection::find`].
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub limit: Option<i64>,
    pub batch_size: Option<i32>,
}

/// Options for the update operations.
#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    pub upsert: bool,
}

/// Counts reported by an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateResult {
    pub matched: i32,
    pub modified: i32,
}

/// A named collection in a database.
#[derive(Clone)]
pub struct Collection {
    client: Client,
    db: String,
    name: String,
}

impl Collection {
    pub(crate) fn new(client: Client, db: String, name: String) -> Collection {
        Collection { client, db, name }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The `db.collection` namespace string.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.db, self.name)
    }

    /// Insert one document. Returns the `_id` the document was stored
    /// under, generating one when the document has none.
    pub async fn insert_one(&self, doc: DocView<'_>) -> Result<ObjectId> {
        let mut owned = doc.to_owned_doc();
        let id = match owned.as_view().get_object_id("_id") {
            Some(id) => id,
            None => {
                let id = ObjectId::new();
                let mut m = owned.mutate();
                let first = m.first_pos();
                m.insert_object_id(first, "_id", id)?;
                id
            }
        };
        let n = self.insert_many(std::slice::from_ref(&owned)).await?;
        if n != 1 {
            return Err(Error::Msg(format!("server reported {n} inserts for one document")));
        }
        Ok(id)
    }

    /// Insert a batch of documents. Returns the server's inserted count.
    pub async fn insert_many(&self, docs: &[DocBuf]) -> Result<i32> {
        let mut body = DocBuf::new();
        {
            let mut m = body.mutate();
            m.append_str("insert", &self.name)?;
            let pos = m.append_array("documents", DocView::empty())?;
            let mut array = m.child_at(pos)?;
            for (i, doc) in docs.iter().enumerate() {
                let at = array.end_pos();
                array.insert_doc(at, &i.to_string(), doc.as_view())?;
            }
        }
        let reply = self.client.command(&self.db, body).await?;
        Ok(reply.as_view().get_number("n").unwrap_or(0.0) as i32)
    }

    /// Query the collection, returning a cursor over the matches. A `None`
    /// filter matches everything.
    pub async fn find(
        &self,
        filter: Option<DocView<'_>>,
        options: FindOptions,
    ) -> Result<Cursor> {
        let mut body = DocBuf::new();
        {
            let mut m = body.mutate();
            m.append_str("find", &self.name)?;
            if let Some(filter) = filter {
                m.append_doc("filter", filter)?;
            }
            if let Some(limit) = options.limit {
                m.append_int64("limit", limit)?;
            }
            if let Some(batch_size) = options.batch_size {
                m.append_int32("batchSize", batch_size)?;
            }
        }
        let reply = self.client.command(&self.db, body).await?;
        Cursor::from_reply(
            self.client.clone(),
            self.db.clone(),
            &reply,
            options.batch_size,
        )
    }

    /// The first document matching `filter`, if any.
    pub async fn find_one(&self, filter: Option<DocView<'_>>) -> Result<Option<DocBuf>> {
        let mut cursor = self
            .find(
                filter,
                FindOptions {
                    limit: Some(1),
                    batch_size: None,
                },
            )
            .await?;
        let doc = cursor.next().await?;
        cursor.kill().await?;
        Ok(doc)
    }

    /// Apply `update` to every document matching `filter`.
    pub async fn update_many(
        &self,
        filter: DocView<'_>,
        update: DocView<'_>,
        options: UpdateOptions,
    ) -> Result<UpdateResult> {
        self.update(filter, update, true, options).await
    }

    /// Apply `update` to the first document matching `filter`.
    pub async fn update_one(
        &self,
        filter: DocView<'_>,
        update: DocView<'_>,
        options: UpdateOptions,
    ) -> Result<UpdateResult> {
        self.update(filter, update, false, options).await
    }

    async fn update(
        &self,
        filter: DocView<'_>,
        update: DocView<'_>,
        multi: bool,
        options: UpdateOptions,
    ) -> Result<UpdateResult> {
        validate_update_document(update)?;
        let mut body = DocBuf::new();
        {
            let mut m = body.mutate();
            m.append_str("update", &self.name)?;
            let pos = m.append_array("updates", DocView::empty())?;
            let mut updates = m.child_at(pos)?;
            let spec_pos = updates.append_doc("0", DocView::empty())?;
            let mut spec = updates.child_at(spec_pos)?;
            spec.append_doc("q", filter)?;
            spec.append_doc("u", update)?;
            spec.append_bool("multi", multi)?;
            if options.upsert {
                spec.append_bool("upsert", true)?;
            }
        }
        let reply = self.client.command(&self.db, body).await?;
        let view = reply.as_view();
        Ok(UpdateResult {
            matched: view.get_number("n").unwrap_or(0.0) as i32,
            modified: view.get_number("nModified").unwrap_or(0.0) as i32,
        })
    }

    /// Run an aggregation pipeline, returning a cursor over its output.
    pub async fn aggregate(&self, pipeline: &[DocBuf], batch_size: Option<i32>) -> Result<Cursor> {
        let mut body = DocBuf::new();
        {
            let mut m = body.mutate();
            m.append_str("aggregate", &self.name)?;
            let pos = m.append_array("pipeline", DocView::empty())?;
            let mut stages = m.child_at(pos)?;
            for (i, stage) in pipeline.iter().enumerate() {
                let at = stages.end_pos();
                stages.insert_doc(at, &i.to_string(), stage.as_view())?;
            }
            drop(stages);
            let cursor_pos = m.append_doc("cursor", DocView::empty())?;
            if let Some(batch_size) = batch_size {
                let mut cursor_opts = m.child_at(cursor_pos)?;
                cursor_opts.append_int32("batchSize", batch_size)?;
            }
        }
        let reply = self.client.command(&self.db, body).await?;
        Cursor::from_reply(self.client.clone(), self.db.clone(), &reply, batch_size)
    }

    /// Delete every document matching `filter`. Returns the deleted count.
    pub async fn delete_many(&self, filter: DocView<'_>) -> Result<i32> {
        let mut body = DocBuf::new();
        {
            let mut m = body.mutate();
            m.append_str("delete", &self.name)?;
            let pos = m.append_array("deletes", DocView::empty())?;
            let mut deletes = m.child_at(pos)?;
            let spec_pos = deletes.append_doc("0", DocView::empty())?;
            let mut spec = deletes.child_at(spec_pos)?;
            spec.append_doc("q", filter)?;
            spec.append_int32("limit", 0)?;
        }
        let reply = self.client.command(&self.db, body).await?;
        Ok(reply.as_view().get_number("n").unwrap_or(0.0) as i32)
    }

    /// Count the documents in the collection.
    pub async fn count(&self) -> Result<i64> {
        let mut body = DocBuf::new();
        body.mutate().append_str("count", &self.name)?;
        let reply = self.client.command(&self.db, body).await?;
        Ok(reply.as_view().get_number("n").unwrap_or(0.0) as i64)
    }

    /// Drop the collection. Dropping a collection that does not exist is
    /// not an error.
    pub async fn drop(&self) -> Result<()> {
        let mut body = DocBuf::new();
        body.mutate().append_str("drop", &self.name)?;
        match self.client.command(&self.db, body).await {
            Ok(_) => Ok(()),
            Err(err)
                if err.status().map(|st| st.code())
                    == Some(ServerErrorCode::NamespaceNotFound as i32) =>
            {
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

/// An update document must be in operator form: non-empty, every top-level
/// key a `$`-operator. Replacement documents go through a different server
/// path this client does not expose.
fn validate_update_document(update: DocView<'_>) -> Result<()> {
    let mut any = false;
    for el in update.iter() {
        let el = el?;
        any = true;
        if !el.key().starts_with('$') {
            return Err(Error::Status(Status::client(
                ClientErrorCode::InvalidUpdateDocument,
            )));
        }
    }
    if !any {
        return Err(Error::Status(Status::client(
            ClientErrorCode::InvalidUpdateDocument,
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bson::DocBuilder;

    #[test]
    fn operator_updates_pass_validation() {
        let update = DocBuilder::new()
            .doc("$set", |d| d.int32("x", 1))
            .build()
            .unwrap();
        assert!(validate_update_document(update.as_view()).is_ok());
    }

    #[test]
    fn replacement_and_empty_updates_are_rejected() {
        let replacement = DocBuilder::new().int32("x", 1).build().unwrap();
        let err = validate_update_document(replacement.as_view()).unwrap_err();
        assert_eq!(
            err.status().map(|st| st.code()),
            Some(ClientErrorCode::InvalidUpdateDocument as i32)
        );

        let empty = DocBuf::new();
        assert!(validate_update_document(empty.as_view()).is_err());
    }
}

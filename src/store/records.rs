use async_trait::async_trait;

use super::{GraphStore, RecordStore, count, triples_block, update};
use crate::error::StoreError;
use crate::extract::Record;
use crate::metrics::METRICS;

const COUNT_RECORDS: &str = "
    SELECT (COUNT(DISTINCT ?record) AS ?n)
    WHERE { GRAPH ?record { ?record a <http://www.w3.org/ns/dcat#Dataset> } }";

const COUNT_PUBLISHERS: &str = "
    SELECT (COUNT(DISTINCT ?name) AS ?n)
    WHERE {
      GRAPH ?record {
        ?record a <http://www.w3.org/ns/dcat#Dataset> ;
          <http://purl.org/dc/terms/publisher> ?publisher .
        ?publisher <http://xmlns.com/foaf/0.1/name> ?name .
      }
    }";

#[async_trait]
impl RecordStore for GraphStore {
    async fn store(&self, record: &Record) -> Result<(), StoreError> {
        let id = record.id().as_str();
        let statement = format!(
            "CLEAR SILENT GRAPH <{id}>;\nINSERT DATA {{ GRAPH <{id}> {{\n{}}} }}",
            triples_block(record.graph().iter())
        );
        self.run(move |store| update(store, &statement)).await?;
        METRICS.record_stored_record();
        Ok(())
    }

    async fn count_records(&self) -> Result<u64, StoreError> {
        self.run(|store| count(store, COUNT_RECORDS)).await
    }

    async fn count_publishers(&self) -> Result<u64, StoreError> {
        self.run(|store| count(store, COUNT_PUBLISHERS)).await
    }
}

//! Tantivy-based invoice lookup index.
//!
//! Invoice numbers and client names are indexed as lower-cased n-grams so the
//! income form typeahead can find an invoice from any fragment of either.

use std::path::Path;
use std::sync::Arc;
use tantivy::collector::DocSetCollector;
use tantivy::query::TermQuery;
use tantivy::schema::{
    Field, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, Value, INDEXED, STORED,
};
use tantivy::tokenizer::{LowerCaser, NgramTokenizer, TextAnalyzer};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tokio::sync::RwLock;

use crate::errors::AppError;
use crate::models::Invoice;

const TOKENIZER: &str = "invoice_ngram";
const MIN_GRAM: usize = 2;
const MAX_GRAM: usize = 16;

/// Search index schema fields.
struct IndexFields {
    invoice_id: Field,
    needle: Field,
}

/// Tantivy index over invoice number and client name.
pub struct InvoiceIndex {
    reader: IndexReader,
    writer: Arc<RwLock<IndexWriter>>,
    fields: IndexFields,
}

fn build_schema() -> (Schema, IndexFields) {
    let mut schema_builder = Schema::builder();
    let invoice_id = schema_builder.add_i64_field("invoice_id", INDEXED | STORED);
    let needle_options = TextOptions::default().set_indexing_options(
        TextFieldIndexing::default()
            .set_tokenizer(TOKENIZER)
            .set_index_option(IndexRecordOption::Basic),
    );
    let needle = schema_builder.add_text_field("needle", needle_options);
    (schema_builder.build(), IndexFields { invoice_id, needle })
}

impl InvoiceIndex {
    /// Create or open the index at the specified path. An index with another
    /// layout is discarded; it is rebuilt from the database at startup anyway.
    pub fn open(index_path: &Path) -> Result<Self, AppError> {
        std::fs::create_dir_all(index_path)
            .map_err(|e| AppError::Search(format!("Failed to create index directory: {}", e)))?;

        let (schema, fields) = build_schema();

        let index = match Index::open_in_dir(index_path) {
            Ok(existing)
                if existing.schema().get_field("needle").is_ok()
                    && existing.schema().get_field("invoice_id").is_ok() =>
            {
                existing
            }
            _ => {
                std::fs::remove_dir_all(index_path).ok();
                std::fs::create_dir_all(index_path).map_err(|e| {
                    AppError::Search(format!("Failed to create index directory: {}", e))
                })?;
                Index::create_in_dir(index_path, schema)
                    .map_err(|e| AppError::Search(format!("Failed to create index: {}", e)))?
            }
        };

        let analyzer = TextAnalyzer::builder(NgramTokenizer::new(MIN_GRAM, MAX_GRAM, false)?)
            .filter(LowerCaser)
            .build();
        index.tokenizers().register(TOKENIZER, analyzer);

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(|e| AppError::Search(format!("Failed to create reader: {}", e)))?;

        let writer = index
            .writer(50_000_000) // 50MB buffer
            .map_err(|e| AppError::Search(format!("Failed to create writer: {}", e)))?;

        Ok(Self {
            reader,
            writer: Arc::new(RwLock::new(writer)),
            fields,
        })
    }

    /// Rebuild the entire index from invoices.
    pub async fn rebuild(&self, invoices: &[Invoice]) -> Result<(), AppError> {
        let mut writer = self.writer.write().await;

        writer.delete_all_documents()?;
        for invoice in invoices {
            writer.add_document(self.create_document(invoice))?;
        }
        writer.commit()?;
        self.reader.reload()?;

        tracing::info!("Invoice index rebuilt with {} invoices", invoices.len());
        Ok(())
    }

    /// Index or re-index a single invoice.
    pub async fn index_invoice(&self, invoice: &Invoice) -> Result<(), AppError> {
        let mut writer = self.writer.write().await;

        writer.delete_term(Term::from_field_i64(self.fields.invoice_id, invoice.id));
        writer.add_document(self.create_document(invoice))?;
        writer.commit()?;
        self.reader.reload()?;

        Ok(())
    }

    pub async fn remove_invoice(&self, invoice_id: i64) -> Result<(), AppError> {
        let mut writer = self.writer.write().await;

        writer.delete_term(Term::from_field_i64(self.fields.invoice_id, invoice_id));
        writer.commit()?;
        self.reader.reload()?;

        Ok(())
    }

    /// Ids of every invoice whose number or client name may contain `query`.
    /// Callers confirm candidates with [`matches_invoice`] and do their own
    /// ordering; the result is not ranked or capped.
    pub fn lookup(&self, query: &str) -> Result<Vec<i64>, AppError> {
        let needle: String = query.trim().to_lowercase().chars().take(MAX_GRAM).collect();
        if needle.chars().count() < MIN_GRAM {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();
        let term_query = TermQuery::new(
            Term::from_field_text(self.fields.needle, &needle),
            IndexRecordOption::Basic,
        );
        let doc_set = searcher
            .search(&term_query, &DocSetCollector)
            .map_err(|e| AppError::Search(format!("Search failed: {}", e)))?;

        Ok(doc_set
            .into_iter()
            .filter_map(|doc_address| {
                let doc: TantivyDocument = searcher.doc(doc_address).ok()?;
                doc.get_first(self.fields.invoice_id)?.as_i64()
            })
            .collect())
    }

    fn create_document(&self, invoice: &Invoice) -> TantivyDocument {
        doc!(
            self.fields.invoice_id => invoice.id,
            self.fields.needle => format!("{} {}", invoice.invoice_no, invoice.client_name)
        )
    }
}

/// Case-insensitive substring match on invoice number or client name.
pub fn matches_invoice(invoice: &Invoice, query: &str) -> bool {
    let query = query.trim().to_lowercase();
    invoice.invoice_no.to_lowercase().contains(&query)
        || invoice.client_name.to_lowercase().contains(&query)
}

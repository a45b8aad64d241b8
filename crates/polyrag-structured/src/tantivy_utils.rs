use tantivy::schema::{IndexRecordOption, Schema, TextFieldIndexing, TextOptions, STORED, STRING};
use tantivy::tokenizer::{LowerCaser, SimpleTokenizer, StopWordFilter, TextAnalyzer};
use tantivy::Index;

pub const RECORD_TOKENIZER: &str = "record_text";

pub fn build_schema() -> Schema {
    let mut schema_builder = Schema::builder();
    schema_builder.add_text_field("id", STRING | STORED);
    schema_builder.add_text_field("document_id", STRING | STORED);
    schema_builder.add_text_field("source", STRING | STORED);
    schema_builder.add_u64_field("row", STORED);
    let body_indexing = TextFieldIndexing::default()
        .set_tokenizer(RECORD_TOKENIZER)
        .set_index_option(IndexRecordOption::WithFreqsAndPositions);
    schema_builder.add_text_field("body", TextOptions::default().set_indexing_options(body_indexing));
    schema_builder.add_text_field("record", STORED);
    schema_builder.build()
}

pub fn register_tokenizer(index: &Index) {
    let stop_words = [
        "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "in", "is", "it", "its", "of", "on", "that",
        "the", "to", "was", "will", "with", "or", "but", "not", "this", "these", "there", "then", "than", "so", "if", "do",
        "does", "did", "have", "had",
    ];
    let tokenizer = TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(LowerCaser)
        .filter(StopWordFilter::remove(stop_words.into_iter().map(str::to_string)))
        .build();
    index.tokenizers().register(RECORD_TOKENIZER, tokenizer);
}

// ============================================================
// CSV INFRASTRUCTURE LAYER
// ============================================================
// CSV ingestion with delimiter and encoding detection

mod csv_parser;

pub use csv_parser::CsvParser;

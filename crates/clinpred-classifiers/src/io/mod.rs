pub mod records;

pub use records::{parse_record_json, read_dataset, read_record_json, read_records_csv};

//! # ER Tracking 存储模块
//!
//! 负责患者入院记录的读写。记录以CSV文件保存，计算模块只通过
//! [`RecordStore`] 读取。

pub mod csv_store;
pub mod memory;
pub mod storage;

pub use csv_store::{export_records, CsvRecordStore};
pub use memory::MemoryRecordStore;
pub use storage::RecordStore;

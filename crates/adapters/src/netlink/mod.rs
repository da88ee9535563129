mod nfqueue_reader;

pub use nfqueue_reader::spawn_queue_readers;

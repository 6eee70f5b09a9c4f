pub mod ms {
    pub const POLL_INTERVAL: u64 = 100;
    pub const STEP: u64 = 30_000;
    pub const CONTENT_WAIT: u64 = 5_000;
    pub const RETRY_BACKOFF: u64 = 500;
    pub const SCROLL_SETTLE: u64 = 1_000;
    pub const QUEUE_ADMISSION: u64 = 60_000;
    pub const POST_SUBMIT_SETTLE: u64 = 300;
}

pub mod secs {
    pub const EXTRACTOR_REQUEST: u64 = 60;
    pub const SERVER_REQUEST: u64 = 10;
    pub const SESSION_IDLE: u64 = 1800;
}

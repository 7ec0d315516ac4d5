pub mod repositories;
pub mod scans;

pub async fn ping_handler() -> &'static str {
    "pong"
}

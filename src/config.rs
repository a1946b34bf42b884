// config.rs
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub ton_api_url: String,
    pub ton_api_key: Option<String>,
    pub custody_address: String,
    /// Minimum operating balance kept in the custody wallet, in nanotons.
    pub reserve_floor_nano: i64,
    /// Balance below this triggers a low-balance warning, in nanotons.
    pub warn_threshold_nano: i64,
    pub confirmation_timeout_secs: u64,
    pub settlement_poll_secs: u64,
}

impl Config {
    pub fn init() -> Config {
        let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let custody_address =
            std::env::var("CUSTODY_WALLET_ADDRESS").expect("CUSTODY_WALLET_ADDRESS must be set");

        // Chain endpoint configuration (with testnet defaults)
        let ton_api_url = std::env::var("TON_API_URL")
            .unwrap_or_else(|_| "https://testnet.toncenter.com/api/v2/jsonRPC".to_string());
        let ton_api_key = std::env::var("TON_API_KEY").ok();

        let reserve_floor_nano = std::env::var("RESERVE_FLOOR_NANO")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(100_000_000); // 0.1 TON
        let warn_threshold_nano = std::env::var("WARN_THRESHOLD_NANO")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(1_000_000_000); // 1 TON

        let confirmation_timeout_secs = std::env::var("CONFIRMATION_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(60);
        let settlement_poll_secs = std::env::var("SETTLEMENT_POLL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(10);

        Config {
            database_url,
            ton_api_url,
            ton_api_key,
            custody_address,
            reserve_floor_nano,
            warn_threshold_nano,
            confirmation_timeout_secs,
            settlement_poll_secs,
        }
    }
}

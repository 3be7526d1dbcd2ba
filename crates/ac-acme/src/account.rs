use crate::client::AcmeClient;
use crate::storage::CertStore;
use crate::types::{AccountRecord, AcmeResult};
use tracing::info;

/// Load the persisted account for `email` or register a new one.
///
/// A cache hit binds the client to the stored credentials without any
/// network traffic. A missing file triggers registration (terms agreed),
/// and the returned record is persisted before this function returns, so
/// a second call registers nothing. Registration failure leaves no file
/// behind; any read failure other than absence is surfaced verbatim and
/// is fatal to startup.
pub async fn get_or_create<C: AcmeClient>(
    store: &CertStore,
    email: &str,
    client: &C,
) -> AcmeResult<AccountRecord> {
    match store.load_account(email) {
        Ok(record) => {
            client.bind(&record).await?;
            info!("using saved ACME account");
            Ok(record)
        }
        Err(e) if e.is_not_found() => {
            info!("generating new ACME account");
            let record = client.register(email, true).await?;
            store.save_account(&record)?;
            Ok(record)
        }
        Err(e) => Err(e),
    }
}

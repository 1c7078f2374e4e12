/// Blueshift API Version
pub const API_VERSION: &str = "v1alpha1";
/// Blueshift CRD Namespace
pub const API_NAMESPACE: &str = "blueshift.dev";
/// Blueshift ManagedApp CRD name
pub const API_MANAGED_APPS: &str = "managedapps";
/// Field manager used for server side apply
pub const FIELD_MANAGER: &str = "blueshift-controller";

pub mod managed_app;
pub mod metrics;

pub mod retry {
    use rand::random;
    use std::time::Duration;
    use tokio::time;

    /// Maximum amount of tries to write a ManagedApp status before giving up on a conflict
    pub const MAX_STATUS_UPDATE_TRIES: u8 = 5;

    /// This method will delay a random percentage of up to 200ms
    ///
    /// Wait for random amount of time to stagger status writes that lost an
    /// optimistic concurrency race against another writer
    pub async fn random_delay() {
        let random_decimal: f32 = random::<f32>();
        let random_delay_0_to_200: u64 = (200_f32 * random_decimal) as u64;
        time::sleep(Duration::from_millis(random_delay_0_to_200)).await;
    }
}

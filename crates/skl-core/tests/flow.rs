//! End-to-end secure session flow.

use skl_core::harness::run_secure_session_flow;

#[tokio::test(start_paused = true)]
async fn secure_session_flow() {
    run_secure_session_flow(482_913)
        .await
        .expect("secure session flow should succeed");
}

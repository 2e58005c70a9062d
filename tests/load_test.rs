//! Concurrent traffic against one service.

use std::time::{Duration, Instant};

mod common;

#[tokio::test]
async fn test_concurrent_requests_all_succeed() {
    let gateway = common::start_gateway(common::config_with(vec![common::service("pets", "ok")])).await;
    let client = common::client();

    let start = Instant::now();
    let mut handles = Vec::new();
    for i in 0..200 {
        let client = client.clone();
        let url = gateway.url(&format!("/pets/item{}", i % 20));
        handles.push(tokio::spawn(async move {
            let res = client.get(url).send().await.unwrap();
            (res.status().as_u16(), res.text().await.unwrap())
        }));
    }

    for handle in handles {
        let (status, body) = handle.await.unwrap();
        assert_eq!(status, 200);
        assert_eq!(body, "ok");
    }
    assert!(start.elapsed() < Duration::from_secs(30));
}

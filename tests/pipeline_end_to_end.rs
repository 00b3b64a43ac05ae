//! End-to-end tests wiring the codec, cache, pipeline, and Hub together
//! in-process, without a live upstream connection.

use std::sync::Arc;

use streamhub_backend::cache::CacheStore;
use streamhub_backend::codec;
use streamhub_backend::hub::Hub;
use streamhub_backend::pipeline::Pipeline;
use streamhub_backend::supervisor::NoopSink;

fn new_pipeline(caches: &Arc<CacheStore>, hub: &Hub) -> Pipeline {
    Pipeline::new(caches.clone(), hub.clone(), Arc::new(NoopSink))
}

#[tokio::test]
async fn decoded_ticker_frame_updates_cache_and_reaches_subscriber() {
    let caches = Arc::new(CacheStore::new(10, 10, 0.0));
    let hub = Hub::spawn(64);
    let pipeline = new_pipeline(&caches, &hub);

    let mut rx = hub.register("client-1".into()).await;
    hub.subscribe("client-1".into(), "BTCUSDT".into()).await;

    let frame = r#"{"stream":"btcusdt@ticker","data":{"e":"24hrTicker","E":1700000000000,"s":"BTCUSDT","c":"30000.5","p":"10","P":"0.03","v":"1234"}}"#;
    for tick in codec::decode(frame).unwrap() {
        pipeline.ingest(tick);
    }

    assert_eq!(caches.get("BTCUSDT").unwrap().last_price(), Some(30000.5));

    let wire = rx.recv().await.unwrap();
    assert!(wire.contains("\"type\":\"price_update\""));
    assert!(wire.contains("30000.5"));
}

#[tokio::test]
async fn subscriber_only_sees_its_own_symbol() {
    let caches = Arc::new(CacheStore::new(10, 10, 0.0));
    let hub = Hub::spawn(64);
    let pipeline = new_pipeline(&caches, &hub);

    let mut btc_rx = hub.register("btc-watcher".into()).await;
    let mut eth_rx = hub.register("eth-watcher".into()).await;
    hub.subscribe("btc-watcher".into(), "BTCUSDT".into()).await;
    hub.subscribe("eth-watcher".into(), "ETHUSDT".into()).await;

    let btc_frame = r#"{"stream":"btcusdt@ticker","data":{"E":1,"s":"BTCUSDT","c":"1","p":"0","P":"0","v":"0"}}"#;
    for tick in codec::decode(btc_frame).unwrap() {
        pipeline.ingest(tick);
    }

    let got = btc_rx.recv().await.unwrap();
    assert!(got.contains("BTCUSDT"));
    assert!(eth_rx.try_recv().is_err(), "eth subscriber should not see a BTC tick");
}

#[tokio::test]
async fn out_of_order_event_time_is_rejected_and_not_broadcast() {
    let caches = Arc::new(CacheStore::new(10, 10, 0.0));
    let hub = Hub::spawn(64);
    let pipeline = new_pipeline(&caches, &hub);

    let mut rx = hub.register("client-1".into()).await;
    hub.subscribe("client-1".into(), "BTCUSDT".into()).await;

    let newer = r#"{"stream":"btcusdt@ticker","data":{"E":1000,"s":"BTCUSDT","c":"100","p":"0","P":"0","v":"0"}}"#;
    let older = r#"{"stream":"btcusdt@ticker","data":{"E":500,"s":"BTCUSDT","c":"1","p":"0","P":"0","v":"0"}}"#;

    for tick in codec::decode(newer).unwrap() {
        pipeline.ingest(tick);
    }
    rx.recv().await.unwrap();

    for tick in codec::decode(older).unwrap() {
        pipeline.ingest(tick);
    }

    assert_eq!(caches.get("BTCUSDT").unwrap().last_price(), Some(100.0));
    assert!(rx.try_recv().is_err(), "stale tick must not be broadcast");
}

#[tokio::test]
async fn unknown_stream_suffix_drops_the_frame_without_affecting_other_traffic() {
    let caches = Arc::new(CacheStore::new(10, 10, 0.0));
    let hub = Hub::spawn(64);
    let pipeline = new_pipeline(&caches, &hub);

    let mut rx = hub.register("client-1".into()).await;
    hub.subscribe("client-1".into(), "BTCUSDT".into()).await;

    let unknown = r#"{"stream":"btcusdt@bookTicker","data":{}}"#;
    assert!(codec::decode(unknown).is_err());

    let ticker = r#"{"stream":"btcusdt@ticker","data":{"E":1,"s":"BTCUSDT","c":"42","p":"0","P":"0","v":"0"}}"#;
    for tick in codec::decode(ticker).unwrap() {
        pipeline.ingest(tick);
    }

    let got = rx.recv().await.unwrap();
    assert!(got.contains("42"));
}

#[tokio::test]
async fn liquidation_array_frame_fans_out_to_the_liquidation_cache() {
    let caches = Arc::new(CacheStore::new(10, 10, 0.0));
    let hub = Hub::spawn(64);
    let pipeline = new_pipeline(&caches, &hub);

    let frame = r#"{"stream":"!forceOrder@arr","data":{"e":"forceOrder","E":1700000000000,"o":{"s":"ETHUSDT","S":"SELL","q":"2.5","p":"1800","ap":"1800","T":1700000000000}}}"#;
    for tick in codec::decode(frame).unwrap() {
        pipeline.ingest(tick);
    }

    let recent = caches.get("ETHUSDT").unwrap().recent_liquidations(10);
    assert_eq!(recent.len(), 1);
}

#[tokio::test]
async fn unsubscribing_stops_further_delivery_but_leaves_cache_intact() {
    let caches = Arc::new(CacheStore::new(10, 10, 0.0));
    let hub = Hub::spawn(64);
    let pipeline = new_pipeline(&caches, &hub);

    let mut rx = hub.register("client-1".into()).await;
    hub.subscribe("client-1".into(), "BTCUSDT".into()).await;

    let first = r#"{"stream":"btcusdt@ticker","data":{"E":1,"s":"BTCUSDT","c":"1","p":"0","P":"0","v":"0"}}"#;
    for tick in codec::decode(first).unwrap() {
        pipeline.ingest(tick);
    }
    rx.recv().await.unwrap();

    hub.unsubscribe("client-1".into(), "BTCUSDT".into()).await;

    let second = r#"{"stream":"btcusdt@ticker","data":{"E":2,"s":"BTCUSDT","c":"2","p":"0","P":"0","v":"0"}}"#;
    for tick in codec::decode(second).unwrap() {
        pipeline.ingest(tick);
    }

    assert_eq!(caches.get("BTCUSDT").unwrap().last_price(), Some(2.0));
    assert!(rx.try_recv().is_err());
}

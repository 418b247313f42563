use bytes::Bytes;
use rbaskets_core::{
    AppError, Basket, BasketConfig, BasketsDatabase, RequestsPage, ResponseConfig, SearchScope,
};

use crate::integration::common::{create_basket, fill, post, setup_test_db};

#[tokio::test]
async fn add_stores_snapshot() {
    let (db, _container) = setup_test_db().await;
    let basket = create_basket(&db, "test101", 20).await;

    let content = "{ \"user\": \"tester\", \"age\": 24 }";
    let record = basket
        .add(&post(
            "http://localhost/test101/demo?name=abc&ver=12".into(),
            content.into(),
        ))
        .await
        .unwrap();

    assert_eq!(basket.size().await.unwrap(), 1);
    assert_eq!(record.body, content);
    assert_eq!(record.content_length, content.len() as u64);

    basket
        .add(&post(
            "http://localhost/test101/demo".into(),
            "Hellow world".into(),
        ))
        .await
        .unwrap();
    assert_eq!(basket.size().await.unwrap(), 2);

    let page = basket.get_requests(10, 0).await.unwrap();
    let stored = &page.requests[1];
    assert_eq!(stored.method, "POST");
    assert_eq!(stored.path, "/test101/demo");
    assert_eq!(stored.query, "name=abc&ver=12");
    assert_eq!(stored.headers["content-type"], vec!["text/plain"]);
    assert_eq!(stored.body, content);
}

#[tokio::test]
async fn add_beyond_capacity_evicts() {
    let (db, _container) = setup_test_db().await;
    let basket = create_basket(&db, "test102", 10).await;

    fill(&basket, 35).await;
    assert_eq!(basket.size().await.unwrap(), 10);
}

#[tokio::test]
async fn clear_empties_basket_and_lifetime() {
    let (db, _container) = setup_test_db().await;
    let basket = create_basket(&db, "test103", 20).await;

    fill(&basket, 15).await;
    assert_eq!(basket.size().await.unwrap(), 15);

    basket.clear().await.unwrap();
    let page = basket.get_requests(10, 0).await.unwrap();
    assert_eq!(page.count, 0);
    assert_eq!(page.total_count, 0);
    assert!(page.requests.is_empty());
}

#[tokio::test]
async fn update_shrink_keeps_newest() {
    let (db, _container) = setup_test_db().await;
    let basket = create_basket(&db, "test104", 30).await;

    fill(&basket, 25).await;
    assert_eq!(basket.size().await.unwrap(), 25);

    let mut config = basket.config().await.unwrap();
    config.capacity = 12;
    basket.update(config).await.unwrap();

    assert_eq!(basket.size().await.unwrap(), 12);
    let page = basket.get_requests(100, 0).await.unwrap();
    assert_eq!(page.requests[0].body, "req25");
    assert_eq!(page.requests[11].body, "req14");
    assert_eq!(page.total_count, 25);
    assert_eq!(basket.config().await.unwrap().capacity, 12);
}

#[tokio::test]
async fn update_replaces_forwarding_settings() {
    let (db, _container) = setup_test_db().await;
    let basket = create_basket(&db, "forward", 30).await;

    let mut config = BasketConfig::new(30).with_forward_url("https://upstream.example/hook");
    config.proxy_response = true;
    config.expand_path = true;
    basket.update(config.clone()).await.unwrap();

    assert_eq!(basket.config().await.unwrap(), config);

    let invalid = BasketConfig::new(30).with_forward_url("nope");
    assert!(matches!(
        basket.update(invalid).await,
        Err(AppError::InvalidConfig(_))
    ));
    assert_eq!(basket.config().await.unwrap(), config);
}

#[tokio::test]
async fn get_requests_pages_newest_first() {
    let (db, _container) = setup_test_db().await;
    let basket = create_basket(&db, "test105", 25).await;

    fill(&basket, 35).await;
    assert_eq!(basket.size().await.unwrap(), 25);

    let page1 = basket.get_requests(10, 0).await.unwrap();
    assert!(page1.has_more);
    assert_eq!(page1.requests.len(), 10);
    assert_eq!(page1.count, 25);
    assert_eq!(page1.total_count, 35);
    assert_eq!(page1.requests[0].body, "req35");

    let page3 = basket.get_requests(10, 20).await.unwrap();
    assert!(!page3.has_more);
    assert_eq!(page3.requests.len(), 5);
    assert_eq!(page3.count, 25);
    assert_eq!(page3.total_count, 35);
    assert_eq!(page3.requests[0].body, "req15");

    let page0 = basket.get_requests(0, 0).await.unwrap();
    assert!(page0.has_more);
    assert!(page0.requests.is_empty());
    assert_eq!(page0.count, 25);
    assert_eq!(page0.total_count, 35);
}

#[tokio::test]
async fn find_requests_by_scope() {
    let (db, _container) = setup_test_db().await;
    let basket = create_basket(&db, "test106", 100).await;

    for i in 1..=30 {
        let mut builder = http::Request::post(format!("http://localhost/test106?id={i}"))
            .header("Content-Type", "text/plain")
            .header("HeaderId", format!("header{i}"));
        if i <= 10 {
            builder = builder.header("ChocoPie", "yummy");
        }
        if i <= 20 {
            builder = builder.header("Muffin", "tasty");
        }
        basket
            .add(&builder.body(Bytes::from(format!("req{i}"))).unwrap())
            .await
            .unwrap();
    }
    assert_eq!(basket.size().await.unwrap(), 30);

    let s1 = basket
        .find_requests("req1", SearchScope::Any, 30, 0)
        .await
        .unwrap();
    assert!(!s1.has_more);
    assert_eq!(s1.requests.len(), 11);
    assert!(s1.requests.iter().all(|r| r.body.contains("req1")));

    let s2 = basket
        .find_requests("req2", SearchScope::Any, 5, 5)
        .await
        .unwrap();
    assert!(s2.has_more);
    assert_eq!(s2.requests.len(), 5);

    let none = basket
        .find_requests("req2", SearchScope::Any, 0, 0)
        .await
        .unwrap();
    assert!(none.requests.is_empty());

    for (phrase, scope, expected) in [
        ("req3", SearchScope::Body, 2),
        ("yummy", SearchScope::Body, 0),
        ("yummy", SearchScope::Headers, 10),
        ("tasty", SearchScope::Headers, 20),
        ("chocopie", SearchScope::Headers, 10),
        ("req1", SearchScope::Headers, 0),
        ("id=1", SearchScope::Query, 11),
        ("tasty", SearchScope::Query, 0),
        ("yummy", SearchScope::Any, 10),
    ] {
        let found = basket.find_requests(phrase, scope, 100, 0).await.unwrap();
        assert_eq!(
            found.requests.len(),
            expected,
            "wrong number of requests for {phrase:?} in {scope}"
        );
    }
}

#[tokio::test]
async fn find_requests_skips_evicted() {
    let (db, _container) = setup_test_db().await;
    let basket = create_basket(&db, "evicted", 10).await;

    fill(&basket, 30).await;

    let found = basket
        .find_requests("req1", SearchScope::Body, 100, 0)
        .await
        .unwrap();
    assert!(found.requests.is_empty());

    let found = basket
        .find_requests("req2", SearchScope::Body, 100, 0)
        .await
        .unwrap();
    assert_eq!(found.requests.len(), 9);
    assert_eq!(found.requests[0].body, "req29");
}

#[tokio::test]
async fn set_response_stores_template() {
    let (db, _container) = setup_test_db().await;
    let basket = create_basket(&db, "test107", 20).await;

    assert!(basket.get_response("POST").await.unwrap().is_none());

    basket
        .set_response(
            "POST",
            ResponseConfig::new(201, "{ 'message' : 'created' }")
                .with_header("Content-Type", "application/json"),
        )
        .await
        .unwrap();

    let response = basket
        .get_response("POST")
        .await
        .unwrap()
        .expect("response for method: POST is expected");
    assert_eq!(response.status, 201);
    assert_eq!(response.body, "{ 'message' : 'created' }");
    assert!(!response.is_template);
    assert_eq!(response.headers["Content-Type"], vec!["application/json"]);
}

#[tokio::test]
async fn set_response_overwrites_previous() {
    let (db, _container) = setup_test_db().await;
    let basket = create_basket(&db, "test108", 20).await;

    basket
        .set_response("GET", ResponseConfig::new(200, ""))
        .await
        .unwrap();
    basket
        .set_response("GET", ResponseConfig::new(200, "welcome").as_template())
        .await
        .unwrap();

    let response = basket.get_response("GET").await.unwrap().unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.body, "welcome");
    assert!(response.is_template);
}

#[tokio::test]
async fn set_response_ignores_long_method() {
    let (db, _container) = setup_test_db().await;
    let basket = create_basket(&db, "test121", 20).await;
    let method = "POSTVERYVERYVERYVERYLONGNAME";

    assert!(basket.get_response(method).await.unwrap().is_none());
    basket
        .set_response(method, ResponseConfig::new(201, "{ 'message' : 'created' }"))
        .await
        .unwrap();
    assert!(basket.get_response(method).await.unwrap().is_none());
}

#[tokio::test]
async fn deleted_basket_reads_zero_values() {
    let (db, _container) = setup_test_db().await;

    db.create(
        "test120",
        BasketConfig::new(30).with_forward_url("http://localhost:8080"),
    )
    .await
    .unwrap();
    let basket = db.get("test120").await.unwrap().unwrap();
    fill(&basket, 3).await;
    basket
        .set_response("GET", ResponseConfig::new(200, "ok"))
        .await
        .unwrap();

    db.delete("test120").await.unwrap();

    let config = basket.config().await.unwrap();
    assert_eq!(config.capacity, 0);
    assert!(config.forward_url.is_none());
    assert_eq!(basket.size().await.unwrap(), 0);
    assert!(basket.get_response("GET").await.unwrap().is_none());
    assert_eq!(
        basket.get_requests(10, 0).await.unwrap(),
        RequestsPage::default()
    );
    assert!(!basket.authorize("anything").await.unwrap());
}

#[tokio::test]
async fn deleted_basket_rejects_mutations() {
    let (db, _container) = setup_test_db().await;
    let basket = create_basket(&db, "stale", 10).await;
    db.delete("stale").await.unwrap();

    let added = basket
        .add(&post("http://localhost/stale".into(), "late".into()))
        .await;
    assert!(matches!(added, Err(AppError::BasketDeleted(_))));
    assert!(matches!(
        basket.update(BasketConfig::new(5)).await,
        Err(AppError::BasketDeleted(_))
    ));
    assert!(matches!(
        basket.clear().await,
        Err(AppError::BasketDeleted(_))
    ));
    assert!(matches!(
        basket
            .set_response("GET", ResponseConfig::new(200, ""))
            .await,
        Err(AppError::BasketDeleted(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_adds_never_exceed_capacity() {
    let (db, _container) = setup_test_db().await;
    let basket = create_basket(&db, "busy", 15).await;

    let mut handles = Vec::new();
    for task in 0..6 {
        let basket = basket.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..10 {
                basket
                    .add(&post(
                        format!("http://localhost/busy?task={task}"),
                        format!("t{task}-{i}"),
                    ))
                    .await
                    .unwrap();
            }
        }));
    }

    // shrink while writers are running
    let shrinker = {
        let basket = basket.clone();
        tokio::spawn(async move {
            basket.update(BasketConfig::new(8)).await.unwrap();
        })
    };

    for handle in handles {
        handle.await.unwrap();
    }
    shrinker.await.unwrap();

    let page = basket.get_requests(0, 0).await.unwrap();
    assert_eq!(page.count, 8);
    assert_eq!(page.total_count, 60);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shrink_racing_adds_stays_within_capacity() {
    let (db, _container) = setup_test_db().await;
    let basket = create_basket(&db, "shrinking", 50).await;

    let mut handles = Vec::new();
    for task in 0..6 {
        let basket = basket.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..6 {
                basket
                    .add(&post(
                        format!("http://localhost/shrinking?task={task}"),
                        format!("t{task}-{i}"),
                    ))
                    .await
                    .unwrap();
            }
        }));
    }
    for _ in 0..4 {
        let basket = basket.clone();
        handles.push(tokio::spawn(async move {
            basket.update(BasketConfig::new(3)).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let capacity = basket.config().await.unwrap().capacity as usize;
    assert_eq!(capacity, 3);
    let page = basket.get_requests(0, 0).await.unwrap();
    assert!(page.count <= capacity);
    assert_eq!(page.count, basket.size().await.unwrap());
    assert_eq!(page.total_count, 36);
}

#[tokio::test]
async fn add_binary_body() {
    let (db, _container) = setup_test_db().await;
    let basket = create_basket(&db, "binary", 10).await;
    fill(&basket, 2).await;

    let request = http::Request::post("http://localhost/binary/upload")
        .header("Content-Type", "image/png")
        .body(Bytes::from_static(b"\x89PNG\0\0\0binary"))
        .unwrap();
    let record = basket.add(&request).await.unwrap();
    assert_eq!(record.content_length, 13);
    assert_eq!(basket.size().await.unwrap(), 3);

    let page = basket.get_requests(1, 0).await.unwrap();
    assert_eq!(page.requests[0].body, record.body);
    assert!(page.requests[0].body.ends_with("binary"));
    assert!(!page.requests[0].body.contains('\0'));

    let found = basket
        .find_requests("PNG", SearchScope::Body, 10, 0)
        .await
        .unwrap();
    assert_eq!(found.requests.len(), 1);
}

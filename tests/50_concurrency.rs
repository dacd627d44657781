mod common;

use std::sync::Arc;

use anyhow::Result;
use axum::http::StatusCode;
use common::TestApp;
use serde_json::{json, Value};

use issuehub_api::database::document::ids_of;
use issuehub_api::database::DocumentStore;
use issuehub_api::filter::Filter;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_hires_of_one_user_leave_a_single_employer() -> Result<()> {
    let app = Arc::new(TestApp::new());
    let admin = app.seed_user("Avery", "ADMIN").await?;

    for round in 0..10 {
        let worker = app.seed_user(&format!("Worker{}", round), "CLIENT").await?;
        let mut companies = Vec::new();
        for n in 0..4 {
            companies.push(app.create_company(admin, json!({ "name": format!("Co{}-{}", round, n) })).await?);
        }

        let attempts = companies.iter().map(|company| {
            let app = app.clone();
            let uri = format!("/api/v1/companies/{}/employees", company);
            tokio::spawn(async move { app.post(&uri, admin, json!({ "user": worker.to_string() })).await })
        });
        let mut accepted = 0;
        for handle in futures::future::join_all(attempts).await {
            let res = handle??;
            match res.status {
                StatusCode::OK => accepted += 1,
                StatusCode::BAD_REQUEST | StatusCode::CONFLICT => {}
                other => anyhow::bail!("unexpected status {}: {}", other, res.body),
            }
        }
        assert_eq!(accepted, 1, "round {}", round);

        let employers = app
            .store
            .count("companies", &Filter::eq("employees", json!(worker.to_string()))?)
            .await?;
        assert_eq!(employers, 1, "round {}", round);

        let company = app.user_company(worker).await?;
        let employer = app
            .store
            .find_by_ids("companies", &ids_of(Some(&Value::Array(vec![company]))))
            .await?;
        assert_eq!(employer.len(), 1);
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_company_creates_claim_each_user_once() -> Result<()> {
    let app = Arc::new(TestApp::new());
    let admin = app.seed_user("Avery", "ADMIN").await?;
    let worker = app.seed_user("Jordan", "CLIENT").await?;

    let attempts = (0..8).map(|n| {
        let app = app.clone();
        tokio::spawn(async move {
            app.post("/api/v1/companies", admin, json!({ "name": format!("Co{}", n), "employees": [worker.to_string()] }))
                .await
        })
    });
    let mut created = 0;
    for handle in futures::future::join_all(attempts).await {
        if handle??.status == StatusCode::CREATED {
            created += 1;
        }
    }
    assert_eq!(created, 1);

    let employers = app
        .store
        .count("companies", &Filter::eq("employees", json!(worker.to_string()))?)
        .await?;
    assert_eq!(employers, 1);
    Ok(())
}

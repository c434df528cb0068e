use pennywise::db::{init_db, DbPool};
use pennywise::registry::{ModelRegistry, ModelUpdate, NewModel, SqliteModelRegistry};
use pennywise::store::{SqliteTranscriptStore, TranscriptStore};
use pennywise::{ApiKey, FinanceError, NewAnalysisTranscript, NewChatTranscript, PageRequest};
use tempfile::{tempdir, TempDir};

async fn open_db() -> (TempDir, DbPool) {
    let dir = match tempdir() {
        Ok(d) => d,
        Err(e) => panic!("Failed to create temp dir: {:?}", e),
    };
    let pool = match init_db(dir.path().join("store.db")).await {
        Ok(p) => p,
        Err(e) => panic!("Failed to init DB: {:?}", e),
    };
    (dir, pool)
}

fn chat(model_id: i64, user_id: i64, text: &str) -> NewChatTranscript {
    NewChatTranscript {
        model_id,
        user_id,
        user_text: format!("question {}", text),
        ai_text: text.to_string(),
    }
}

#[tokio::test]
async fn test_chat_history_is_scoped_and_newest_first() {
    let (_dir, pool) = open_db().await;
    let store = SqliteTranscriptStore::new(pool);

    for (user, text) in [(7, "first"), (8, "other user"), (7, "second"), (7, "third")] {
        if let Err(e) = store.insert_chat(&chat(1, user, text)).await {
            panic!("insert failed: {:?}", e);
        }
    }
    if let Err(e) = store.insert_chat(&chat(2, 7, "other model")).await {
        panic!("insert failed: {:?}", e);
    }

    let page = match store.list_chat(1, Some(7), PageRequest::default()).await {
        Ok(p) => p,
        Err(e) => panic!("list failed: {:?}", e),
    };
    assert_eq!(page.total, 3);
    assert_eq!(page.page, 1);
    assert_eq!(page.page_size, 20);
    let texts: Vec<&str> = page.list.iter().map(|t| t.ai_text.as_str()).collect();
    assert_eq!(texts, vec!["third", "second", "first"]);
    assert!(page.list.iter().all(|t| t.user_id == 7 && t.model_id == 1));

    let unscoped = match store.list_chat(1, None, PageRequest::default()).await {
        Ok(p) => p,
        Err(e) => panic!("list failed: {:?}", e),
    };
    assert_eq!(unscoped.total, 4);
}

#[tokio::test]
async fn test_chat_history_paging() {
    let (_dir, pool) = open_db().await;
    let store = SqliteTranscriptStore::new(pool);

    for i in 0..5 {
        if let Err(e) = store.insert_chat(&chat(1, 3, &format!("answer {}", i))).await {
            panic!("insert failed: {:?}", e);
        }
    }

    let page = match store
        .list_chat(1, Some(3), PageRequest { page: 2, page_size: 2 })
        .await
    {
        Ok(p) => p,
        Err(e) => panic!("list failed: {:?}", e),
    };
    assert_eq!(page.total, 5);
    let texts: Vec<&str> = page.list.iter().map(|t| t.ai_text.as_str()).collect();
    assert_eq!(texts, vec!["answer 2", "answer 1"]);

    let past_end = match store
        .list_chat(1, Some(3), PageRequest { page: 4, page_size: 2 })
        .await
    {
        Ok(p) => p,
        Err(e) => panic!("list failed: {:?}", e),
    };
    assert_eq!(past_end.total, 5);
    assert!(past_end.list.is_empty());
}

#[tokio::test]
async fn test_soft_delete_hides_records() {
    let (_dir, pool) = open_db().await;
    let store = SqliteTranscriptStore::new(pool.clone());

    let id = match store.insert_chat(&chat(1, 0, "keep me?")).await {
        Ok(id) => id,
        Err(e) => panic!("insert failed: {:?}", e),
    };

    assert!(matches!(store.find_chat(id).await, Ok(Some(_))));
    assert!(matches!(store.soft_delete_chat(id).await, Ok(true)));
    assert!(matches!(store.find_chat(id).await, Ok(None)));
    assert!(matches!(store.soft_delete_chat(id).await, Ok(false)));

    let page = match store.list_chat(1, None, PageRequest::default()).await {
        Ok(p) => p,
        Err(e) => panic!("list failed: {:?}", e),
    };
    assert_eq!(page.total, 0);

    // Row is kept with a deletion marker.
    let marked: (i64,) = match sqlx::query_as(
        "SELECT COUNT(*) FROM ai_chat_messages WHERE id = ? AND deleted_at IS NOT NULL",
    )
    .bind(id)
    .fetch_one(&pool)
    .await
    {
        Ok(c) => c,
        Err(e) => panic!("count failed: {:?}", e),
    };
    assert_eq!(marked.0, 1);
}

#[tokio::test]
async fn test_analysis_round_trip() {
    let (_dir, pool) = open_db().await;
    let store = SqliteTranscriptStore::new(pool);

    let id = match store
        .insert_analysis(&NewAnalysisTranscript {
            model_id: 4,
            user_id: 11,
            start_date: "2026-01-01".into(),
            end_date: "2026-01-31".into(),
            result: "Dining is up 20%.".into(),
        })
        .await
    {
        Ok(id) => id,
        Err(e) => panic!("insert failed: {:?}", e),
    };

    let found = match store.find_analysis(id).await {
        Ok(Some(f)) => f,
        other => panic!("expected record, got {:?}", other),
    };
    assert_eq!(found.model_id, 4);
    assert_eq!(found.user_id, 11);
    assert_eq!(found.start_date, "2026-01-01");
    assert_eq!(found.end_date, "2026-01-31");
    assert_eq!(found.result, "Dining is up 20%.");

    let page = match store.list_analysis(4, Some(11), PageRequest::default()).await {
        Ok(p) => p,
        Err(e) => panic!("list failed: {:?}", e),
    };
    assert_eq!(page.total, 1);

    assert!(matches!(store.soft_delete_analysis(id).await, Ok(true)));
    assert!(matches!(store.find_analysis(id).await, Ok(None)));
}

fn new_model(name: &str) -> NewModel {
    NewModel {
        name: name.to_string(),
        base_url: "https://llm.example/v1/".to_string(),
        api_key: ApiKey::new("sk-testkeytestkeytestkey"),
    }
}

#[tokio::test]
async fn test_registry_lifecycle() {
    let (_dir, pool) = open_db().await;
    let registry = SqliteModelRegistry::new(pool);

    let created = match registry.create_model(&new_model("gpt-mini")).await {
        Ok(m) => m,
        Err(e) => panic!("create failed: {:?}", e),
    };
    assert_eq!(created.name, "gpt-mini");

    let found = match registry.find_model(created.id).await {
        Ok(m) => m,
        Err(e) => panic!("find failed: {:?}", e),
    };
    assert_eq!(found.api_key.expose(), "sk-testkeytestkeytestkey");
    assert_eq!(found.completions_url(), "https://llm.example/v1/chat/completions");

    match registry.create_model(&new_model("gpt-mini")).await {
        Err(e) => assert!(matches!(e.inner, FinanceError::InvalidRequest(_))),
        Ok(_) => panic!("duplicate name accepted"),
    }

    if let Err(e) = registry.create_model(&new_model("deep-think")).await {
        panic!("create failed: {:?}", e);
    }
    let names: Vec<String> = match registry.list_models().await {
        Ok(models) => models.into_iter().map(|m| m.name).collect(),
        Err(e) => panic!("list failed: {:?}", e),
    };
    assert_eq!(names, vec!["gpt-mini".to_string(), "deep-think".to_string()]);

    if let Err(e) = registry.delete_model(created.id).await {
        panic!("delete failed: {:?}", e);
    }
    match registry.find_model(created.id).await {
        Err(e) => assert!(matches!(e.inner, FinanceError::NotFound(_))),
        Ok(_) => panic!("deleted model still resolvable"),
    }
    match registry.delete_model(created.id).await {
        Err(e) => assert!(matches!(e.inner, FinanceError::NotFound(_))),
        Ok(_) => panic!("double delete succeeded"),
    }

    // A deleted name can be registered again.
    if let Err(e) = registry.create_model(&new_model("gpt-mini")).await {
        panic!("re-create failed: {:?}", e);
    }
}

#[tokio::test]
async fn test_registry_rejects_invalid_models() {
    let (_dir, pool) = open_db().await;
    let registry = SqliteModelRegistry::new(pool);

    let mut model = new_model("  ");
    assert!(registry.create_model(&model).await.is_err());

    model.name = "ok".into();
    model.base_url = "ftp://nope".into();
    assert!(registry.create_model(&model).await.is_err());

    model.base_url = "http://localhost:9000".into();
    model.api_key = ApiKey::new("");
    assert!(registry.create_model(&model).await.is_err());

    match registry.find_model(999).await {
        Err(e) => assert!(matches!(e.inner, FinanceError::NotFound(_))),
        Ok(_) => panic!("unknown model resolved"),
    }
}

#[tokio::test]
async fn test_registry_partial_update() {
    let (_dir, pool) = open_db().await;
    let registry = SqliteModelRegistry::new(pool);

    let first = match registry.create_model(&new_model("gpt-mini")).await {
        Ok(m) => m,
        Err(e) => panic!("create failed: {:?}", e),
    };
    if let Err(e) = registry.create_model(&new_model("deep-think")).await {
        panic!("create failed: {:?}", e);
    }

    // Blank fields leave the stored values alone.
    let update = ModelUpdate::from_fields("", "https://other.example/v2", " ");
    let updated = match registry.update_model(first.id, &update).await {
        Ok(m) => m,
        Err(e) => panic!("update failed: {:?}", e),
    };
    assert_eq!(updated.name, "gpt-mini");
    assert_eq!(updated.base_url, "https://other.example/v2");
    assert_eq!(updated.api_key.expose(), "sk-testkeytestkeytestkey");

    let update = ModelUpdate::from_fields("gpt-mini-2", "", "sk-rotatedkeyrotatedkey");
    let updated = match registry.update_model(first.id, &update).await {
        Ok(m) => m,
        Err(e) => panic!("update failed: {:?}", e),
    };
    assert_eq!(updated.name, "gpt-mini-2");
    assert_eq!(updated.api_key.expose(), "sk-rotatedkeyrotatedkey");

    // Keeping its own name is not a conflict.
    let same = ModelUpdate::from_fields("gpt-mini-2", "", "");
    assert!(registry.update_model(first.id, &same).await.is_ok());

    let clash = ModelUpdate::from_fields("deep-think", "", "");
    match registry.update_model(first.id, &clash).await {
        Err(e) => assert!(matches!(e.inner, FinanceError::InvalidRequest(_))),
        Ok(_) => panic!("rename onto a live name accepted"),
    }

    let bad_url = ModelUpdate::from_fields("", "ftp://nope", "");
    assert!(registry.update_model(first.id, &bad_url).await.is_err());

    match registry.update_model(999, &ModelUpdate::default()).await {
        Err(e) => assert!(matches!(e.inner, FinanceError::NotFound(_))),
        Ok(_) => panic!("unknown model updated"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rstest::rstest;

    use crate::core::persistence::{Backends, InMemoryBackend, PersistenceClient};
    use crate::core::{
        ColumnMapping, DeletePolicy, Field, Index, IndexKind, MappingType, ModelError, Operation,
        Position, Relation, RelationType, SelectOutcome, SessionConfig, SessionEngine,
        SessionError, SessionState, Table, TableId,
    };

    fn users_table() -> Table {
        Table::new("p1", "users")
            .with_id("users")
            .add_field(Field::new("id", "BIGINT").primary_key().auto_increment())
            .add_field(Field::new("name", "VARCHAR(255)"))
            .add_index(Index::new("pk_users", IndexKind::Primary, ["id"]))
    }

    fn orders_table() -> Table {
        Table::new("p1", "orders")
            .with_id("orders")
            .add_field(Field::new("id", "BIGINT").primary_key().auto_increment())
            .add_field(Field::new("user_id", "BIGINT").not_null())
    }

    fn products_table() -> Table {
        Table::new("p1", "products")
            .with_id("products")
            .add_field(Field::new("id", "BIGINT").primary_key().auto_increment())
    }

    async fn backend() -> Arc<InMemoryBackend> {
        let backend = Arc::new(InMemoryBackend::new());
        for table in [users_table(), orders_table(), products_table()] {
            backend.insert_table(&table).await.unwrap();
        }
        backend
    }

    async fn session_with(backend: &Arc<InMemoryBackend>, config: SessionConfig) -> SessionEngine {
        let mut session = SessionEngine::new(&config, Backends::shared(backend.clone()));
        session.load_table_list("p1").await.unwrap();
        session
    }

    async fn session(backend: &Arc<InMemoryBackend>) -> SessionEngine {
        session_with(backend, SessionConfig::default()).await
    }

    fn field_names(session: &SessionEngine, table: &str) -> Vec<String> {
        session
            .model()
            .table(&TableId::from(table))
            .unwrap()
            .fields
            .iter()
            .map(|f| f.name.clone())
            .collect()
    }

    fn rename_field(session: &SessionEngine, table: &str, from: &str, to: &str) -> Operation {
        let table_id = TableId::from(table);
        let (_, field) = session
            .model()
            .table(&table_id)
            .unwrap()
            .find_field(from)
            .unwrap();
        let mut renamed = field.clone();
        renamed.name = to.to_string();
        Operation::UpdateField {
            table_id,
            field_id: field.id.clone(),
            field: renamed,
        }
    }

    fn user_orders_relation() -> Relation {
        Relation::new("p1", "users", "orders", RelationType::OneToMany)
            .with_mapping(ColumnMapping::new("id", "user_id", MappingType::ForeignKey))
    }

    // ========================================================================
    // Edit, undo, save
    // ========================================================================

    #[tokio::test]
    async fn test_rename_undo_add_save_scenario() {
        let backend = backend().await;
        let mut session = session(&backend).await;
        session.select_table("users").await.unwrap();
        assert!(!session.is_dirty());

        let rename = rename_field(&session, "users", "name", "full_name");
        session.mutate(rename).unwrap();
        assert!(session.is_dirty());
        assert_eq!(session.state(), SessionState::Editing);

        assert!(session.undo().unwrap());
        assert_eq!(field_names(&session, "users"), vec!["id", "name"]);
        assert!(!session.is_dirty());
        assert_eq!(session.state(), SessionState::Ready);

        session
            .mutate(Operation::AddField {
                table_id: TableId::from("users"),
                field: Field::new("email", "VARCHAR(255)"),
            })
            .unwrap();
        session.save().await.unwrap();

        assert!(!session.is_dirty());
        assert_eq!(session.history().len(), 1);
        let entry = session.history().entry(0).unwrap();
        assert!(entry.table(&TableId::from("users")).unwrap().has_column("email"));

        let stored = backend.get_table(&TableId::from("users")).await.unwrap();
        let names: Vec<String> = stored
            .decode()
            .table
            .fields
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["id", "name", "email"]);
    }

    #[tokio::test]
    async fn test_clean_after_save_even_though_history_origin_is_stale() {
        let backend = backend().await;
        let mut session = session(&backend).await;
        session.select_table("users").await.unwrap();

        session
            .mutate(rename_field(&session, "users", "name", "full_name"))
            .unwrap();
        session.save().await.unwrap();
        assert!(!session.is_dirty());

        session
            .mutate(Operation::AddField {
                table_id: TableId::from("users"),
                field: Field::new("email", "VARCHAR(255)"),
            })
            .unwrap();
        session.undo().unwrap();
        assert!(!session.is_dirty());

        // Discarding goes back to the saved state, not to the first load
        session
            .mutate(rename_field(&session, "users", "full_name", "display"))
            .unwrap();
        session.discard_changes();
        assert_eq!(field_names(&session, "users"), vec!["id", "full_name"]);
    }

    // ========================================================================
    // History properties
    // ========================================================================

    #[rstest]
    #[case(1)]
    #[case(3)]
    #[case(6)]
    #[tokio::test]
    async fn test_undo_redo_symmetry(#[case] edits: usize) {
        let backend = backend().await;
        let mut session = session(&backend).await;
        session.select_table("users").await.unwrap();
        let initial = session.snapshot();

        for i in 0..edits {
            session
                .mutate(Operation::AddField {
                    table_id: TableId::from("users"),
                    field: Field::new(format!("extra_{}", i), "INT"),
                })
                .unwrap();
        }
        let edited = session.snapshot();

        for _ in 0..edits {
            assert!(session.undo().unwrap());
        }
        assert!(!session.undo().unwrap());
        assert_eq!(session.snapshot(), initial);

        for _ in 0..edits {
            assert!(session.redo().unwrap());
        }
        assert!(!session.redo().unwrap());
        assert_eq!(session.snapshot(), edited);
    }

    #[tokio::test]
    async fn test_new_edit_after_undo_discards_redo_branch() {
        let backend = backend().await;
        let mut session = session(&backend).await;
        session.select_table("users").await.unwrap();

        session
            .mutate(rename_field(&session, "users", "name", "full_name"))
            .unwrap();
        session.undo().unwrap();
        assert!(session.can_redo());

        session
            .mutate(Operation::MoveTable {
                table_id: TableId::from("users"),
                position: Position::new(10.0, 10.0),
            })
            .unwrap();
        assert!(!session.can_redo());
        assert!(!session.redo().unwrap());
        assert_eq!(field_names(&session, "users"), vec!["id", "name"]);
    }

    #[tokio::test]
    async fn test_history_entries_do_not_alias_live_state() {
        let backend = backend().await;
        let mut session = session(&backend).await;
        session.select_table("users").await.unwrap();

        session
            .mutate(Operation::AddField {
                table_id: TableId::from("users"),
                field: Field::new("email", "VARCHAR(255)"),
            })
            .unwrap();
        let recorded = session.history().entry(1).unwrap().clone();

        session
            .mutate(rename_field(&session, "users", "email", "contact_email"))
            .unwrap();
        session
            .mutate(Operation::MoveTable {
                table_id: TableId::from("users"),
                position: Position::new(-40.0, 12.5),
            })
            .unwrap();

        assert_eq!(session.history().entry(1).unwrap(), &recorded);
        let users = recorded.table(&TableId::from("users")).unwrap();
        assert!(users.has_column("email"));
        assert!(!users.has_column("contact_email"));
    }

    #[tokio::test]
    async fn test_bounded_history_keeps_dirty_baseline() {
        let backend = backend().await;
        let config = SessionConfig {
            history_limit: Some(3),
            ..SessionConfig::default()
        };
        let mut session = session_with(&backend, config).await;
        session.select_table("users").await.unwrap();

        for i in 0..5 {
            session
                .mutate(Operation::AddField {
                    table_id: TableId::from("users"),
                    field: Field::new(format!("col_{}", i), "INT"),
                })
                .unwrap();
        }
        let mut undone = 0;
        while session.undo().unwrap() {
            undone += 1;
        }
        assert_eq!(undone, 2);
        assert!(session.is_dirty());
    }

    // ========================================================================
    // Relations and cascading deletes
    // ========================================================================

    #[tokio::test]
    async fn test_cascade_delete_reports_removed_relations() {
        let backend = backend().await;
        let mut session = session(&backend).await;
        session.select_table("users").await.unwrap();
        session.select_table("orders").await.unwrap();
        session.add_relation(user_orders_relation()).await.unwrap();
        session.save().await.unwrap();
        let relation_id = session.model().relations()[0].id.clone();

        let outcome = session
            .mutate(Operation::DeleteTable(TableId::from("users")))
            .unwrap();
        assert_eq!(outcome.removed_relation_ids, vec![relation_id.clone()]);
        assert!(session.model().relations().is_empty());
        assert!(session.positions().get(&TableId::from("users")).is_none());

        // Undo brings back the table and its relation together
        session.undo().unwrap();
        assert!(session.model().relation(&relation_id).is_some());
        assert!(session.positions().get(&TableId::from("users")).is_some());

        session.redo().unwrap();
        let saved = session.save().await.unwrap();
        assert_eq!(saved.deleted_tables, vec![TableId::from("users")]);
        assert_eq!(saved.deleted_relations, vec![relation_id]);
        assert!(backend.table(&TableId::from("users")).await.is_none());
        assert!(backend.relations().await.is_empty());
    }

    #[tokio::test]
    async fn test_reject_policy_blocks_referenced_delete() {
        let backend = backend().await;
        let config = SessionConfig {
            delete_policy: DeletePolicy::Reject,
            ..SessionConfig::default()
        };
        let mut session = session_with(&backend, config).await;
        session.select_table("users").await.unwrap();
        session.select_table("orders").await.unwrap();
        session.add_relation(user_orders_relation()).await.unwrap();
        let history_len = session.history().len();

        let err = session
            .mutate(Operation::DeleteTable(TableId::from("orders")))
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Model(ModelError::ReferentialIntegrity { .. })
        ));
        assert!(session.model().contains_table(&TableId::from("orders")));
        assert_eq!(session.history().len(), history_len);
    }

    #[tokio::test]
    async fn test_circular_relation_is_rejected() {
        let backend = backend().await;
        let mut session = session(&backend).await;
        session.select_table("users").await.unwrap();
        session.select_table("orders").await.unwrap();
        session.add_relation(user_orders_relation()).await.unwrap();

        let back = Relation::new("p1", "orders", "users", RelationType::ManyToOne);
        let err = session.add_relation(back).await.unwrap_err();
        assert!(err.to_string().contains("circular"));
        assert_eq!(session.model().relations().len(), 1);
    }

    #[tokio::test]
    async fn test_relation_to_unsaved_table_is_rejected() {
        let backend = backend().await;
        let mut session = session(&backend).await;
        session.select_table("users").await.unwrap();
        let draft = Table::new("p1", "invoices").add_field(Field::new("user_id", "BIGINT"));
        let draft_id = draft.id.clone();
        session.mutate(Operation::AddTable(draft)).unwrap();

        let relation = Relation::new("p1", "users", draft_id, RelationType::OneToMany);
        assert!(matches!(
            session.add_relation(relation).await,
            Err(SessionError::Model(ModelError::Validation(_)))
        ));
    }

    // ========================================================================
    // Async selection
    // ========================================================================

    #[tokio::test]
    async fn test_stale_select_response_is_discarded() {
        let backend = backend().await;
        let mut session = session(&backend).await;

        let ticket_b = session.begin_select("orders").unwrap();
        let ticket_c = session.begin_select("products").unwrap();

        let response_c = backend.get_table(ticket_c.table_id()).await;
        let applied = session.finish_select(ticket_c, response_c).unwrap();
        assert!(matches!(applied, SelectOutcome::Applied { .. }));

        let response_b = backend.get_table(ticket_b.table_id()).await;
        let stale = session.finish_select(ticket_b, response_b).unwrap();
        assert_eq!(
            stale,
            SelectOutcome::Stale {
                table_id: TableId::from("orders")
            }
        );

        assert_eq!(session.active_table_id(), Some(&TableId::from("products")));
        assert!(!session.model().contains_table(&TableId::from("orders")));
        assert!(!session.is_dirty());
    }

    #[tokio::test]
    async fn test_reselecting_a_clean_table_does_not_dirty() {
        let backend = backend().await;
        let mut session = session(&backend).await;
        session.select_table("users").await.unwrap();
        let placed = session.positions().get(&TableId::from("users"));

        session.select_table("orders").await.unwrap();
        session.select_table("users").await.unwrap();
        assert_eq!(session.model().tables().len(), 2);
        assert_eq!(session.positions().get(&TableId::from("users")), placed);
        assert!(!session.is_dirty());
        assert!(!session.can_undo());
    }

    #[tokio::test]
    async fn test_reselecting_an_edited_table_keeps_the_edit() {
        let backend = backend().await;
        let mut session = session(&backend).await;
        session.select_table("users").await.unwrap();
        let rename = rename_field(&session, "users", "name", "full_name");
        session.mutate(rename).unwrap();

        session.select_table("orders").await.unwrap();
        session.select_table("users").await.unwrap();

        assert_eq!(field_names(&session, "users"), vec!["id", "full_name"]);
        assert!(session.is_dirty());
        assert_eq!(session.active_table_id(), Some(&TableId::from("users")));

        assert!(session.undo().unwrap());
        assert_eq!(field_names(&session, "users"), vec!["id", "name"]);
        assert!(session.redo().unwrap());
        assert_eq!(field_names(&session, "users"), vec!["id", "full_name"]);
    }

    #[tokio::test]
    async fn test_late_response_for_an_edited_table_keeps_the_edit() {
        let backend = backend().await;
        let mut session = session(&backend).await;
        session.select_table("users").await.unwrap();

        let ticket = session.begin_select("users").unwrap();
        let rename = rename_field(&session, "users", "name", "full_name");
        session.mutate(rename).unwrap();
        let response = backend.get_table(ticket.table_id()).await;
        session.finish_select(ticket, response).unwrap();

        assert_eq!(field_names(&session, "users"), vec!["id", "full_name"]);
        assert!(session.is_dirty());
    }

    #[tokio::test]
    async fn test_selecting_a_deleted_table_does_not_restore_it() {
        let backend = backend().await;
        let mut session = session(&backend).await;
        session.select_table("products").await.unwrap();
        session
            .mutate(Operation::DeleteTable(TableId::from("products")))
            .unwrap();

        let err = session.select_table("products").await.unwrap_err();
        assert!(matches!(err, SessionError::Model(ModelError::NotFound { .. })));
        assert!(!session.model().contains_table(&TableId::from("products")));
        assert!(session.is_dirty());
    }
}

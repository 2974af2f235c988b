use std::sync::Arc;

use schemacraft::core::persistence::{Backends, InMemoryBackend};
use schemacraft::core::{
    ColumnMapping, Field, Index, IndexKind, MappingType, Operation, Relation, RelationType,
    SessionConfig, SessionEngine, SessionError, Table,
};

#[tokio::main]
async fn main() -> Result<(), SessionError> {
    // Load .env file (if exists)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    let config = SessionConfig::from_env();
    tracing::info!(
        "Config loaded: history_limit={:?}, delete_policy={:?}, validation={:?}",
        config.history_limit,
        config.delete_policy,
        config.validation_level
    );

    // Seed a small project in the in-memory store
    let backend = Arc::new(InMemoryBackend::new());
    let users = Table::new("demo", "users")
        .with_display_name("Users")
        .with_id("users")
        .add_field(Field::new("id", "BIGINT").primary_key().auto_increment())
        .add_field(Field::new("name", "VARCHAR(255)"))
        .add_index(Index::new("pk_users", IndexKind::Primary, ["id"]));
    backend.insert_table(&users).await?;

    let mut session = SessionEngine::new(&config, Backends::shared(backend.clone()));
    session.load_table_list("demo").await?;
    session.select_table("users").await?;

    let orders = Table::new("demo", "orders")
        .add_field(Field::new("id", "BIGINT").primary_key().auto_increment())
        .add_field(Field::new("user_id", "BIGINT").not_null());
    session.mutate(Operation::AddTable(orders))?;
    let saved = session.save().await?;
    tracing::info!("Created {} table(s)", saved.saved_tables.len());

    if let Some(orders_id) = session.active_table_id().cloned() {
        let relation = Relation::new("demo", "users", orders_id, RelationType::OneToMany)
            .with_mapping(ColumnMapping::new("id", "user_id", MappingType::ForeignKey));
        session.add_relation(relation).await?;
    }

    tracing::info!(
        "Session is {} with {} undoable edit(s), dirty={}",
        session.state().name(),
        session.history().index(),
        session.is_dirty()
    );

    session.save().await?;
    session.sync_active().await?;
    tracing::info!(
        "Saved and synced; {} relation(s) stored",
        backend.relations().await.len()
    );

    Ok(())
}

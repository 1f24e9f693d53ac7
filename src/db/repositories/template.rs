use sqlx::{Pool, Postgres};
use tracing::instrument;

use super::TemplateRepository;
use crate::db::PgResult;
use crate::db::models::PairedTemplate;

#[derive(Debug)]
pub struct PgTemplateRepository {
    pool: &'static Pool<Postgres>,
}

impl PgTemplateRepository {
    pub fn new(pool: &'static Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TemplateRepository for PgTemplateRepository {
    #[instrument(skip(self))]
    async fn paired(&self, family: &str) -> PgResult<Vec<PairedTemplate>> {
        Ok(sqlx::query_as::<_, PairedTemplate>(
            r#"
            SELECT id, phrase_one, phrase_two
            FROM paired_templates
            WHERE family = $1
            "#,
        )
        .bind(family)
        .fetch_all(self.pool)
        .await?)
    }
}

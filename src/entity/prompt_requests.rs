use sea_orm::entity::prelude::*;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "prompt_requests")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub kid_username: String,
    #[sea_orm(column_type = "Text")]
    pub prompt: String,
    pub status: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub answer: Option<String>,
    pub created_at_us: i64,
    pub decided_at_us: Option<i64>,
}

impl ActiveModelBehavior for ActiveModel {}

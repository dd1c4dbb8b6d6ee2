use sea_orm::entity::prelude::*;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "violation_attempts")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub kid_username: String,
    #[sea_orm(column_type = "Text")]
    pub prompt: String,
    pub violation: String,
    pub timestamp_us: i64,
}

impl ActiveModelBehavior for ActiveModel {}

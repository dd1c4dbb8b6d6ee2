use sea_orm::entity::prelude::*;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "chat_messages")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub session_id: i64,
    pub sender: String,
    #[sea_orm(column_type = "Text")]
    pub content: String,
    pub timestamp_us: i64,
}

impl ActiveModelBehavior for ActiveModel {}

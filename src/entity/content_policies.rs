use sea_orm::entity::prelude::*;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "content_policies")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub kid_username: String,
    /// Comma-separated, as entered by the guardian.
    pub allowed: String,
    pub restricted: String,
}

impl ActiveModelBehavior for ActiveModel {}

use crate::store::StoreError;

pub mod bus;
pub mod driver;
pub mod graph;
pub mod route;
pub mod trip;

pub fn convert_error(why: sqlx::Error) -> StoreError {
    match why {
        sqlx::Error::RowNotFound => StoreError::NotFound,
        _ => StoreError::Other(Box::new(why)),
    }
}

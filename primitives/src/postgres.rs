//! `ToSql` / `FromSql` for the hex-encoded domain identifiers and status
//! enums, all stored as `VARCHAR`/`TEXT`.

use std::error::Error;

use bytes::BytesMut;
use tokio_postgres::types::{accepts, to_sql_checked, FromSql, IsNull, ToSql, Type};

use crate::{AccountId, Address, ChannelId, ChannelStatus, SessionId, SessionStatus};

macro_rules! text_sql {
    ($ty:ty, $to_text:expr) => {
        impl<'a> FromSql<'a> for $ty {
            fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
                let text = <&str as FromSql<'_>>::from_sql(ty, raw)?;

                Ok(text.parse()?)
            }

            accepts!(VARCHAR, TEXT);
        }

        impl ToSql for $ty {
            fn to_sql(
                &self,
                ty: &Type,
                out: &mut BytesMut,
            ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
                #[allow(clippy::redundant_closure_call)]
                let text: String = ($to_text)(self);

                text.to_sql(ty, out)
            }

            accepts!(VARCHAR, TEXT);

            to_sql_checked!();
        }
    };
}

text_sql!(Address, |address: &Address| address.to_lowercase_string());
text_sql!(ChannelId, |id: &ChannelId| id.to_string());
text_sql!(SessionId, |id: &SessionId| id.to_string());
text_sql!(ChannelStatus, |status: &ChannelStatus| status.to_string());
text_sql!(SessionStatus, |status: &SessionStatus| status.to_string());

impl<'a> FromSql<'a> for AccountId {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        let text = <&str as FromSql<'_>>::from_sql(ty, raw)?;

        Ok(AccountId::from(text))
    }

    accepts!(VARCHAR, TEXT);
}

impl ToSql for AccountId {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        self.as_str().to_sql(ty, out)
    }

    accepts!(VARCHAR, TEXT);

    to_sql_checked!();
}

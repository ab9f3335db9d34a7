//! SystemTime ↔ timestamptz codec.

use std::time::{Duration, SystemTime};

/// TIMESTAMPTZ carries microseconds relative to `2000-01-01 00:00:00 UTC`.
/// https://www.postgresql.org/docs/current/protocol-logicalrep-message-formats.html
const POSTGRESQL_EPOCH_DURATION: Duration = Duration::from_secs(946_684_800);

fn postgresql_epoch() -> SystemTime {
    SystemTime::UNIX_EPOCH + POSTGRESQL_EPOCH_DURATION
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct PgTimestamp(pub SystemTime);

impl sqlx::Type<sqlx::Postgres> for PgTimestamp {
    fn type_info() -> <sqlx::Postgres as sqlx::Database>::TypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("timestamptz")
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for PgTimestamp {
    fn encode_by_ref(
        &self,
        buf: &mut <sqlx::Postgres as sqlx::Database>::ArgumentBuffer<'q>,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        const OUT_OF_RANGE_MESSAGE: &str = "timestamp out of range for PostgreSQL i64 micros";

        let pg_us = match self.0.duration_since(postgresql_epoch()) {
            Ok(after) => i64::try_from(after.as_micros()).map_err(|_| OUT_OF_RANGE_MESSAGE)?,
            Err(before) => {
                let micros = before.duration().as_micros();
                i64::try_from(micros)
                    .map(|v| -v)
                    .map_err(|_| OUT_OF_RANGE_MESSAGE)?
            }
        };

        sqlx::Encode::<sqlx::Postgres>::encode(pg_us, buf)
    }

    fn size_hint(&self) -> usize {
        std::mem::size_of::<i64>()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for PgTimestamp {
    fn decode(
        value: <sqlx::Postgres as sqlx::Database>::ValueRef<'r>,
    ) -> Result<Self, sqlx::error::BoxDynError> {
        let pg_us: i64 = sqlx::Decode::<sqlx::Postgres>::decode(value)?;
        let timestamp = if pg_us >= 0 {
            postgresql_epoch() + Duration::from_micros(pg_us as u64)
        } else {
            postgresql_epoch() - Duration::from_micros(pg_us.unsigned_abs())
        };
        Ok(Self(timestamp))
    }
}

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::{
    AppState,
    error::ApiError,
    guard::DeviceCheck,
    routes::location::model::ChurchLocation,
    schedule::{self, ServiceType},
    utils::calculate_distance,
};

/// 成员信息（由外部成员管理系统维护，这里只读）
#[derive(Debug, Serialize, FromRow)]
pub struct Member {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Serialize, FromRow)]
pub struct AttendanceRecord {
    pub id: Uuid,
    pub member_id: Uuid,
    pub service_type: String,
    pub service_date: NaiveDate,
    pub recorded_at: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub location_name: String,
    pub verified: bool,
}

#[derive(Debug, Deserialize)]
pub struct MarkAttendanceRequest {
    pub email: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub device_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MarkedAttendance {
    pub record: AttendanceRecord,
    pub member: Member,
}

/// 按礼拜类型统计的签到次数
#[derive(Debug, Serialize, FromRow)]
pub struct ServiceCount {
    pub service_type: String,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct MemberAttendanceHistory {
    pub member: Member,
    pub total_count: i64,
    pub counts_by_service: Vec<ServiceCount>,
    pub records: Vec<AttendanceRecord>,
}

/// 管理端签到记录查询条件
#[derive(Debug, Default)]
pub struct RecordsFilter {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub service_type: Option<ServiceType>,
    pub member_id: Option<Uuid>,
}

/// 带成员信息的签到记录（管理端列表用）
#[derive(Debug, Serialize, FromRow)]
pub struct ListedRecord {
    pub id: Uuid,
    pub member_id: Uuid,
    pub member_email: String,
    pub member_first_name: String,
    pub member_last_name: String,
    pub service_type: String,
    pub service_date: NaiveDate,
    pub recorded_at: DateTime<Utc>,
    pub location_name: String,
    pub verified: bool,
}

#[derive(Debug, Serialize)]
pub struct AttendanceReport {
    pub total: i64,
    pub counts_by_service: Vec<ServiceCount>,
    pub records: Vec<ListedRecord>,
}

const RECORD_COLUMNS: &str = "id, member_id, service_type, service_date, recorded_at, \
     latitude, longitude, location_name, verified";

impl MarkAttendanceRequest {
    /// 四个字段都必须存在且非空
    fn validated(self) -> Result<(String, f64, f64, String), ApiError> {
        let email = self
            .email
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .ok_or(ApiError::MissingFields)?;
        let device_id = self
            .device_id
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .ok_or(ApiError::MissingFields)?;
        let latitude = self.latitude.ok_or(ApiError::MissingFields)?;
        let longitude = self.longitude.ok_or(ApiError::MissingFields)?;

        Ok((email, latitude, longitude, device_id))
    }
}

impl Member {
    pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            "SELECT id, email, first_name, last_name FROM members WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(pool)
        .await
    }
}

impl AttendanceRecord {
    /// 签到主流程
    ///
    /// 依次执行：输入校验 → 礼拜窗口 → 设备检查 → 成员查询 →
    /// 生效地点 → 距离校验 → 当天重复检查 → 落库。
    /// 任何一步失败都立即返回对应错误，整个流程不做重试。
    pub async fn mark(
        state: &AppState,
        req: MarkAttendanceRequest,
    ) -> Result<MarkedAttendance, ApiError> {
        let (email, latitude, longitude, device_id) = req.validated()?;

        // 礼拜日与当前礼拜都按配置的礼拜时区计算，与主机时区无关
        let now = Utc::now().with_timezone(&state.config.service_offset());
        let service = schedule::current_service(now).ok_or(ApiError::OutsideServiceWindow)?;
        let service_date = now.date_naive();

        // 设备检查放在成员查询之前，先做廉价校验
        if let DeviceCheck::Rejected { .. } = state
            .device_guard
            .check_and_record(&device_id, service_date, service, &email)
            .await?
        {
            tracing::warn!(
                "Device rejected for {} service on {}: already used by a different member",
                service,
                service_date
            );
            return Err(ApiError::DeviceAlreadyUsed);
        }

        let member = Member::find_by_email(&state.pool, &email)
            .await?
            .ok_or(ApiError::MemberNotFound)?;

        let location = ChurchLocation::active_for(&state.pool, service)
            .await?
            .ok_or(ApiError::NoActiveLocation)?;

        let distance = calculate_distance(latitude, longitude, location.latitude, location.longitude);
        if distance > location.radius as f64 {
            return Err(ApiError::OutOfRange {
                location_name: location.name,
                radius_m: location.radius,
                distance_m: distance,
            });
        }

        if let Some(existing) =
            Self::find_for_day(&state.pool, member.id, service, service_date).await?
        {
            return Err(ApiError::AlreadyMarked {
                recorded_at: existing.recorded_at,
                location_name: existing.location_name,
            });
        }

        // 唯一索引是并发提交的最终防线，预检查只是为了友好报错
        let inserted = sqlx::query_as::<_, Self>(&format!(
            r#"
            INSERT INTO attendance_records
                (id, member_id, service_type, service_date, latitude, longitude,
                 location_name, verified)
            VALUES ($1, $2, $3, $4, $5, $6, $7, TRUE)
            ON CONFLICT (member_id, service_type, service_date) DO NOTHING
            RETURNING {RECORD_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(member.id)
        .bind(service.as_str())
        .bind(service_date)
        .bind(latitude)
        .bind(longitude)
        .bind(&location.name)
        .fetch_optional(&state.pool)
        .await?;

        match inserted {
            Some(record) => {
                tracing::info!(
                    "Attendance marked for member {} at {} ({})",
                    member.id,
                    record.location_name,
                    record.service_type
                );
                Ok(MarkedAttendance { record, member })
            }
            None => {
                // 并发请求抢先写入了同一条记录
                let existing = Self::find_for_day(&state.pool, member.id, service, service_date)
                    .await?
                    .ok_or_else(|| ApiError::Database(sqlx::Error::RowNotFound))?;
                Err(ApiError::AlreadyMarked {
                    recorded_at: existing.recorded_at,
                    location_name: existing.location_name,
                })
            }
        }
    }

    pub async fn find_for_day(
        pool: &PgPool,
        member_id: Uuid,
        service: ServiceType,
        day: NaiveDate,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(&format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM attendance_records
            WHERE member_id = $1 AND service_type = $2 AND service_date = $3
            "#
        ))
        .bind(member_id)
        .bind(service.as_str())
        .bind(day)
        .fetch_optional(pool)
        .await
    }

    /// 成员签到历史：总数、按礼拜类型统计、最近的记录
    pub async fn member_history(
        pool: &PgPool,
        email: &str,
        limit: i64,
    ) -> Result<MemberAttendanceHistory, ApiError> {
        let member = Member::find_by_email(pool, email)
            .await?
            .ok_or(ApiError::MemberNotFound)?;

        let records = sqlx::query_as::<_, Self>(&format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM attendance_records
            WHERE member_id = $1
            ORDER BY recorded_at DESC
            LIMIT $2
            "#
        ))
        .bind(member.id)
        .bind(limit)
        .fetch_all(pool)
        .await?;

        let total_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM attendance_records WHERE member_id = $1")
                .bind(member.id)
                .fetch_one(pool)
                .await?;

        let counts_by_service = sqlx::query_as::<_, ServiceCount>(
            r#"
            SELECT service_type, COUNT(*) AS count
            FROM attendance_records
            WHERE member_id = $1
            GROUP BY service_type
            "#,
        )
        .bind(member.id)
        .fetch_all(pool)
        .await?;

        Ok(MemberAttendanceHistory {
            member,
            total_count,
            counts_by_service,
            records,
        })
    }

    /// 管理端查询：按时间范围、礼拜类型、成员过滤
    pub async fn list(pool: &PgPool, filter: RecordsFilter) -> Result<AttendanceReport, ApiError> {
        let service_type = filter.service_type.map(|s| s.as_str());

        let records = sqlx::query_as::<_, ListedRecord>(
            r#"
            SELECT a.id, a.member_id, m.email AS member_email,
                   m.first_name AS member_first_name, m.last_name AS member_last_name,
                   a.service_type, a.service_date, a.recorded_at,
                   a.location_name, a.verified
            FROM attendance_records a
            JOIN members m ON m.id = a.member_id
            WHERE ($1::timestamptz IS NULL OR a.recorded_at >= $1)
              AND ($2::timestamptz IS NULL OR a.recorded_at <= $2)
              AND ($3::text IS NULL OR a.service_type = $3)
              AND ($4::uuid IS NULL OR a.member_id = $4)
            ORDER BY a.recorded_at DESC
            "#,
        )
        .bind(filter.start_date)
        .bind(filter.end_date)
        .bind(service_type)
        .bind(filter.member_id)
        .fetch_all(pool)
        .await?;

        let counts_by_service = sqlx::query_as::<_, ServiceCount>(
            r#"
            SELECT service_type, COUNT(*) AS count
            FROM attendance_records
            WHERE ($1::timestamptz IS NULL OR recorded_at >= $1)
              AND ($2::timestamptz IS NULL OR recorded_at <= $2)
              AND ($3::text IS NULL OR service_type = $3)
              AND ($4::uuid IS NULL OR member_id = $4)
            GROUP BY service_type
            "#,
        )
        .bind(filter.start_date)
        .bind(filter.end_date)
        .bind(service_type)
        .bind(filter.member_id)
        .fetch_all(pool)
        .await?;

        Ok(AttendanceReport {
            total: records.len() as i64,
            counts_by_service,
            records,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(
        email: Option<&str>,
        latitude: Option<f64>,
        longitude: Option<f64>,
        device_id: Option<&str>,
    ) -> MarkAttendanceRequest {
        MarkAttendanceRequest {
            email: email.map(str::to_string),
            latitude,
            longitude,
            device_id: device_id.map(str::to_string),
        }
    }

    #[test]
    fn complete_request_passes_validation() {
        let validated = request(
            Some("alice@x.com"),
            Some(-1.2794),
            Some(36.8156),
            Some("dev-1"),
        )
        .validated()
        .unwrap();
        assert_eq!(
            validated,
            (
                "alice@x.com".to_string(),
                -1.2794,
                36.8156,
                "dev-1".to_string()
            )
        );
    }

    #[test]
    fn missing_or_blank_fields_are_rejected() {
        let cases = [
            request(None, Some(-1.0), Some(36.0), Some("dev-1")),
            request(Some(""), Some(-1.0), Some(36.0), Some("dev-1")),
            request(Some("  "), Some(-1.0), Some(36.0), Some("dev-1")),
            request(Some("alice@x.com"), None, Some(36.0), Some("dev-1")),
            request(Some("alice@x.com"), Some(-1.0), None, Some("dev-1")),
            request(Some("alice@x.com"), Some(-1.0), Some(36.0), None),
            request(Some("alice@x.com"), Some(-1.0), Some(36.0), Some("")),
        ];
        for case in cases {
            assert!(matches!(case.validated(), Err(ApiError::MissingFields)));
        }
    }

    #[test]
    fn zero_coordinates_are_valid_input() {
        // 0.0 是合法坐标，不能当作缺失处理
        let validated = request(Some("alice@x.com"), Some(0.0), Some(0.0), Some("dev-1"))
            .validated()
            .unwrap();
        assert_eq!(validated.1, 0.0);
        assert_eq!(validated.2, 0.0);
    }

    #[test]
    fn whitespace_around_email_is_trimmed() {
        let validated = request(
            Some("  alice@x.com "),
            Some(-1.0),
            Some(36.0),
            Some("dev-1"),
        )
        .validated()
        .unwrap();
        assert_eq!(validated.0, "alice@x.com");
    }
}

use std::fmt;

use chrono::{DateTime, Datelike, FixedOffset, Timelike, Weekday};
use serde::{Deserialize, Serialize};

/// 礼拜类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceType {
    SabbathMorning,
    WednesdayVespers,
    FridayVespers,
}

impl ServiceType {
    pub const ALL: [ServiceType; 3] = [
        ServiceType::SabbathMorning,
        ServiceType::WednesdayVespers,
        ServiceType::FridayVespers,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::SabbathMorning => "SABBATH_MORNING",
            ServiceType::WednesdayVespers => "WEDNESDAY_VESPERS",
            ServiceType::FridayVespers => "FRIDAY_VESPERS",
        }
    }

    pub fn parse(value: &str) -> Option<ServiceType> {
        match value {
            "SABBATH_MORNING" => Some(ServiceType::SabbathMorning),
            "WEDNESDAY_VESPERS" => Some(ServiceType::WednesdayVespers),
            "FRIDAY_VESPERS" => Some(ServiceType::FridayVespers),
            _ => None,
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 根据给定时刻判断当前生效的礼拜
///
/// 时间窗口为左闭右开区间：
/// 周六 [8, 17) 为安息日上午聚会，周三和周五 [17, 20) 为晚祷。
/// 传入的时刻必须已经换算到配置的礼拜时区。
pub fn current_service(now: DateTime<FixedOffset>) -> Option<ServiceType> {
    let hour = now.hour();

    match now.weekday() {
        Weekday::Sat if (8..17).contains(&hour) => Some(ServiceType::SabbathMorning),
        Weekday::Wed if (17..20).contains(&hour) => Some(ServiceType::WednesdayVespers),
        Weekday::Fri if (17..20).contains(&hour) => Some(ServiceType::FridayVespers),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleEntry {
    pub day: &'static str,
    pub time: &'static str,
    pub service_type: ServiceType,
}

/// 完整礼拜时间表，窗口外签到的错误响应和状态接口都会返回它
#[derive(Debug, Clone, Serialize)]
pub struct ServiceSchedule {
    pub sabbath: ScheduleEntry,
    pub wednesday_vespers: ScheduleEntry,
    pub friday_vespers: ScheduleEntry,
}

pub fn full_schedule() -> ServiceSchedule {
    ServiceSchedule {
        sabbath: ScheduleEntry {
            day: "Saturday",
            time: "8:00 AM - 5:00 PM",
            service_type: ServiceType::SabbathMorning,
        },
        wednesday_vespers: ScheduleEntry {
            day: "Wednesday",
            time: "5:00 PM - 8:00 PM",
            service_type: ServiceType::WednesdayVespers,
        },
        friday_vespers: ScheduleEntry {
            day: "Friday",
            time: "5:00 PM - 8:00 PM",
            service_type: ServiceType::FridayVespers,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};

    fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(3 * 3600)
            .unwrap()
            .with_ymd_and_hms(year, month, day, hour, minute, 0)
            .unwrap()
    }

    // 2025-03-03 是周一，2025-03-05 周三，2025-03-07 周五，2025-03-08 周六

    #[test]
    fn saturday_morning_window() {
        assert_eq!(current_service(at(2025, 3, 8, 7, 59)), None);
        assert_eq!(
            current_service(at(2025, 3, 8, 8, 0)),
            Some(ServiceType::SabbathMorning)
        );
        assert_eq!(
            current_service(at(2025, 3, 8, 10, 30)),
            Some(ServiceType::SabbathMorning)
        );
        assert_eq!(
            current_service(at(2025, 3, 8, 16, 59)),
            Some(ServiceType::SabbathMorning)
        );
        // 上界为开区间
        assert_eq!(current_service(at(2025, 3, 8, 17, 0)), None);
    }

    #[test]
    fn wednesday_vespers_window() {
        assert_eq!(current_service(at(2025, 3, 5, 16, 59)), None);
        assert_eq!(
            current_service(at(2025, 3, 5, 17, 0)),
            Some(ServiceType::WednesdayVespers)
        );
        assert_eq!(
            current_service(at(2025, 3, 5, 19, 59)),
            Some(ServiceType::WednesdayVespers)
        );
        assert_eq!(current_service(at(2025, 3, 5, 20, 0)), None);
    }

    #[test]
    fn friday_vespers_window() {
        assert_eq!(
            current_service(at(2025, 3, 7, 17, 0)),
            Some(ServiceType::FridayVespers)
        );
        assert_eq!(
            current_service(at(2025, 3, 7, 19, 59)),
            Some(ServiceType::FridayVespers)
        );
        assert_eq!(current_service(at(2025, 3, 7, 20, 0)), None);
        // 周五上午没有礼拜
        assert_eq!(current_service(at(2025, 3, 7, 10, 0)), None);
    }

    #[test]
    fn no_service_on_other_days() {
        // 周日到周四（除周三晚祷外）全天都不在窗口内
        for hour in 0..24 {
            assert_eq!(current_service(at(2025, 3, 9, hour, 0)), None); // 周日
            assert_eq!(current_service(at(2025, 3, 3, hour, 0)), None); // 周一
            assert_eq!(current_service(at(2025, 3, 4, hour, 0)), None); // 周二
            assert_eq!(current_service(at(2025, 3, 6, hour, 0)), None); // 周四
        }
    }

    #[test]
    fn weekly_window_hours_are_exclusive_and_bounded() {
        // 整周扫描：每小时最多一个礼拜，每天的窗口小时数符合时间表
        let mut per_service = std::collections::HashMap::new();
        for day in 3..=9 {
            for hour in 0..24 {
                if let Some(service) = current_service(at(2025, 3, day, hour, 0)) {
                    *per_service.entry(service).or_insert(0) += 1;
                }
            }
        }
        assert_eq!(per_service.get(&ServiceType::SabbathMorning), Some(&9));
        assert_eq!(per_service.get(&ServiceType::WednesdayVespers), Some(&3));
        assert_eq!(per_service.get(&ServiceType::FridayVespers), Some(&3));
    }

    #[test]
    fn service_type_round_trips_through_wire_form() {
        for service in ServiceType::ALL {
            assert_eq!(ServiceType::parse(service.as_str()), Some(service));
        }
        assert_eq!(ServiceType::parse("SUNDAY_EVENING"), None);
    }
}

use formfill_core::Field;

/// Field-type keyword groups, checked in order. The first group with a
/// keyword contained in the field type supplies the query.
pub const KEYWORD_GROUPS: &[(&[&str], &str)] = &[
    (&["姓名", "name"], "姓名 名字 员工姓名 name"),
    (&["邮箱", "email"], "邮箱 email 电子邮件"),
    (&["电话", "phone"], "电话 手机 联系方式 phone"),
    (&["地址", "address"], "地址 住址 工作地址 address"),
    (&["公司", "company"], "公司 企业 工作单位 company"),
    (&["职位", "position"], "职位 岗位 职务 position"),
    (&["部门", "department"], "部门 科室 团队 department"),
    (&["技能", "skill"], "技能 技术 能力 skill"),
    (&["教育", "education"], "教育 学历 学校 education"),
    (&["经验", "experience"], "经验 工作经历 履历 experience"),
];

/// Builds the retrieval query for one field. Empty when the field carries
/// neither a matching type nor any description.
pub fn query_for_field(field: &Field) -> String {
    if let Some(kind) = field.field_type.as_deref() {
        let lowered = kind.to_lowercase();
        for (keywords, query) in KEYWORD_GROUPS {
            if keywords
                .iter()
                .any(|k| kind.contains(k) || lowered.contains(k))
            {
                return (*query).to_string();
            }
        }
    }
    let description = field.description.as_deref().unwrap_or("");
    let suggested = field.suggested_type.as_deref().unwrap_or("");
    format!("{description} {suggested}").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use formfill_core::{Coordinate, FormatSnapshot};

    fn field(field_type: Option<&str>, description: Option<&str>) -> Field {
        let mut f = Field::new(1, Coordinate::new(0, 0, 0), "", FormatSnapshot::default());
        f.field_type = field_type.map(str::to_string);
        f.description = description.map(str::to_string);
        f
    }

    #[test]
    fn field_type_selects_first_matching_group() {
        assert_eq!(
            query_for_field(&field(Some("Email"), Some("contact"))),
            "邮箱 email 电子邮件"
        );
        assert_eq!(
            query_for_field(&field(Some("员工姓名"), None)),
            "姓名 名字 员工姓名 name"
        );
    }

    #[test]
    fn falls_back_to_description_and_type() {
        let mut f = field(Some("salary"), Some("Monthly salary"));
        f.suggested_type = Some("number".into());
        assert_eq!(query_for_field(&f), "Monthly salary number");
        assert_eq!(query_for_field(&field(None, None)), "");
    }
}

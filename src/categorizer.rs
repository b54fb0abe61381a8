use crate::models::Category;

/// Keyword groups in priority order. The first group with a keyword
/// contained in the merchant name wins.
pub const CATEGORY_KEYWORDS: &[(Category, &[&str])] = &[
    (Category::Fuel, &["shell", "exxon", "bp", "gas", "fuel", "truck stop"]),
    (Category::Meals, &["mcdonald", "burger", "restaurant", "cafe", "pizza", "subway"]),
    (Category::Office, &["office", "depot", "staples", "supplies"]),
    (Category::Maintenance, &["auto", "service", "repair", "tire", "oil"]),
    (Category::Lodging, &["hotel", "inn", "motel", "lodge"]),
];

fn matches(merchant_lower: &str, keyword: &str) -> bool {
    merchant_lower.contains(keyword)
}

/// The category and the keyword that selected it, if any group matched.
pub fn match_keyword(merchant_name: &str) -> Option<(Category, &'static str)> {
    let merchant = merchant_name.to_lowercase();
    CATEGORY_KEYWORDS.iter().find_map(|(category, keywords)| {
        keywords
            .iter()
            .find(|kw| matches(&merchant, kw))
            .map(|kw| (*category, *kw))
    })
}

pub fn categorize(merchant_name: &str) -> Category {
    match_keyword(merchant_name)
        .map(|(category, _)| category)
        .unwrap_or(Category::Other)
}

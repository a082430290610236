// Prompt templates for intent extraction and recommendations.

use voicecart_core::shopping::HistoryRecord;

// ---------------------------------------------------------------------------
// Intent extraction
// ---------------------------------------------------------------------------

/// Build the intent-extraction prompt for one (English) utterance.
pub fn build_intent_prompt(user_text: &str) -> String {
    format!(
        "You turn spoken shopping requests into structured commands.\n\
         \n\
         Decide the intent:\n\
         - \"add_to_list\": the user wants an item on the shopping list.\n\
         - \"remove_from_list\": the user wants an item taken off the list.\n\
         - \"search_item\": the user is looking for a product, optionally with filters.\n\
         \n\
         Fields:\n\
         - item: product name, singular and lowercase.\n\
         - quantity: a number; 1 when not mentioned (add/remove only).\n\
         - category: a short grocery category such as dairy, snacks, vegetables, beverages.\n\
         - price: a realistic unit price in US dollars, as a number.\n\
         - brand / size: as mentioned, otherwise \"any\".\n\
         - search_term: what to look for (search only, singular).\n\
         - filters: brand and size for search, \"any\" when not mentioned.\n\
         - price_range: min and max for search, both 0 when not mentioned.\n\
         \n\
         Add/remove format:\n\
         {{\"intent\": \"add_to_list\" | \"remove_from_list\", \"item\": \"<item>\", \
         \"quantity\": <number>, \"category\": \"<category>\", \"price\": <number>, \
         \"brand\": \"<brand>\", \"size\": \"<size>\"}}\n\
         \n\
         Search format:\n\
         {{\"intent\": \"search_item\", \"search_term\": \"<term>\", \
         \"filters\": {{\"brand\": \"<brand>\", \"size\": \"<size>\"}}, \
         \"price_range\": {{\"min\": <number>, \"max\": <number>}}}}\n\
         \n\
         Reply with raw JSON only: no markdown, no commentary, no null values.\n\
         If the request has nothing to do with shopping, reply exactly:\n\
         Not a shopping command.\n\
         \n\
         The speaker may have used Hindi, Marathi, Tamil or another Indian language; \
         interpret it in English.\n\
         \n\
         Request: {}\n",
        quote(user_text)
    )
}

// ---------------------------------------------------------------------------
// Recommendations
// ---------------------------------------------------------------------------

/// Build the recommendation prompt from the full add-history.
pub fn build_recommendation_prompt(history: &[HistoryRecord], max_suggestions: usize) -> String {
    format!(
        "You are a friendly shopping assistant. From the purchase history below, suggest \
         {max_suggestions} items the shopper may want: things they buy again and again, \
         items that are in season, or items likely to be running low (one or two left).\n\
         \n\
         Purchase history (oldest first):\n\
         {}\n\
         \n\
         Reply ONLY with a raw JSON array of {max_suggestions} strings. Each string is a short, \
         upbeat sentence naming the item, for example:\n\
         [\"Running low on milk? Grab a fresh carton.\", \"Mangoes are in season, pick up a few.\"]\n",
        format_history_for_prompt(history)
    )
}

/// One line per history record; a placeholder when there is no history.
pub fn format_history_for_prompt(history: &[HistoryRecord]) -> String {
    if history.is_empty() {
        return "(no purchases yet)".to_string();
    }
    history
        .iter()
        .map(|r| {
            let mut line = format!(
                "- {} x {} [{}] on {}",
                r.quantity,
                r.name,
                r.category,
                r.timestamp.format("%Y-%m-%d")
            );
            if r.brand != "any" {
                line.push_str(&format!(", brand {}", r.brand));
            }
            if r.size != "any" {
                line.push_str(&format!(", size {}", r.size));
            }
            if r.total_price > 0.0 {
                line.push_str(&format!(", ${:.2}", r.total_price));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Quote user text so embedded quotes or newlines cannot break the template.
fn quote(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', " "))
}

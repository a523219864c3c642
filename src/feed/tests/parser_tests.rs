use crate::feed::{FeedParser, continuation, looks_like_record};
use crate::results::Continuation;
use serde_json::json;

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://ideogram.ai/api/g/u?user_id=me";

    #[test]
    fn test_nested_requests_yield_their_responses() {
        // Requests carry a prompt but no image keys; the images sit one level down
        let body = json!({
            "results": [
                {
                    "request_id": "req1",
                    "prompt": "a red fox",
                    "responses": [
                        {"response_id": "r1", "prompt": "a red fox", "seed": 1},
                        {"response_id": "r2", "prompt": "a red fox", "seed": 2}
                    ]
                },
                {
                    "request_id": "req2",
                    "prompt": "a blue whale",
                    "responses": [{"response_id": "r3", "prompt": "a blue whale"}]
                }
            ],
            "next_cursor": "abc"
        });

        let page = FeedParser::parse(URL, &body).unwrap();
        let ids: Vec<&str> = page.records.iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec!["r1", "r2", "r3"]);
        assert_eq!(page.continuation, Continuation::More);
        assert_eq!(page.source_url, URL);
    }

    #[test]
    fn test_top_level_list_of_images() {
        let body = json!([
            {"id": "a", "url": "https://cdn/a.png", "prompt": "one"},
            {"id": "b", "url": "https://cdn/b.png", "prompt": "two"}
        ]);
        let page = FeedParser::parse(URL, &body).unwrap();
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.continuation, Continuation::Unknown);
    }

    #[test]
    fn test_records_without_identifier_are_skipped() {
        let body = json!({
            "images": [
                {"url": "https://cdn/a.png", "prompt": "no id"},
                {"response_id": "r1", "prompt": "kept"}
            ]
        });
        let page = FeedParser::parse(URL, &body).unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].id(), "r1");
    }

    #[test]
    fn test_empty_pages_are_feed_pages() {
        let page = FeedParser::parse(URL, &json!([])).unwrap();
        assert!(page.records.is_empty());

        let page = FeedParser::parse(URL, &json!({"results": []})).unwrap();
        assert!(page.records.is_empty());

        let page = FeedParser::parse(URL, &json!({"has_more": false})).unwrap();
        assert_eq!(page.continuation, Continuation::Done);
    }

    #[test]
    fn test_unrelated_json_is_not_a_page() {
        assert!(FeedParser::parse(URL, &json!({"user_id": "me", "plan": "free"})).is_none());
        assert!(FeedParser::parse(URL, &json!("ok")).is_none());
        assert!(FeedParser::parse(URL, &json!({"results": [1, 2]})).is_none());
    }

    #[test]
    fn test_continuation_markers() {
        assert_eq!(continuation(&json!({"has_more": true})), Continuation::More);
        assert_eq!(continuation(&json!({"hasMore": false})), Continuation::Done);
        assert_eq!(continuation(&json!({"next_cursor": null})), Continuation::Done);
        assert_eq!(continuation(&json!({"cursor": ""})), Continuation::Done);
        assert_eq!(continuation(&json!({"next_page": 3})), Continuation::More);
        assert_eq!(continuation(&json!({"next": "/api/feed?page=2"})), Continuation::More);
        assert_eq!(continuation(&json!({"results": []})), Continuation::Unknown);
        assert_eq!(continuation(&json!([])), Continuation::Unknown);

        // A boolean marker outranks a cursor
        assert_eq!(
            continuation(&json!({"has_more": false, "next_cursor": "x"})),
            Continuation::Done
        );
    }

    #[test]
    fn test_looks_like_record() {
        let yes = json!({"response_id": "r"});
        assert!(looks_like_record(yes.as_object().unwrap()));

        let yes = json!({"thumbnail_url": "t", "prompt": "p"});
        assert!(looks_like_record(yes.as_object().unwrap()));

        let no = json!({"prompt": "p", "request_id": "q"});
        assert!(!looks_like_record(no.as_object().unwrap()));

        let no = json!({"url": "https://site/avatar.png"});
        assert!(!looks_like_record(no.as_object().unwrap()));
    }

    #[test]
    fn test_search_depth_is_bounded() {
        let mut body = json!({"response_id": "deep", "prompt": "p"});
        for _ in 0..12 {
            body = json!({"wrapper": body});
        }
        body["results"] = json!([]);
        let page = FeedParser::parse(URL, &body).unwrap();
        assert!(page.records.is_empty());
    }
}

use crate::navigator::WaitCondition;

pub fn escape_selector(selector: &str) -> String {
    selector.replace('\\', "\\\\").replace('\'', "\\'")
}

pub const OUTER_HTML: &str = "document.documentElement.outerHTML";

pub const SCROLL_TO_BOTTOM: &str =
    "(function(){window.scrollTo(0,document.body?document.body.scrollHeight:0);return true})()";

pub const READY_STATE_COMPLETE: &str = "document.readyState==='complete'";

pub fn element_exists(selector: &str) -> String {
    format!(
        "document.querySelector('{}')!==null",
        escape_selector(selector)
    )
}

pub fn text_present(text: &str) -> String {
    format!(
        "(document.body?document.body.innerText:'').toLowerCase().includes('{}'.toLowerCase())",
        escape_selector(text)
    )
}

pub fn url_changed(from: &str) -> String {
    format!("window.location.href!=='{}'", escape_selector(from))
}

/// Boolean JS expression that is true once `condition` holds.
pub fn wait_predicate(condition: &WaitCondition) -> String {
    match condition {
        WaitCondition::Load => READY_STATE_COMPLETE.to_string(),
        WaitCondition::Selector(s) => element_exists(s),
        WaitCondition::SelectorAbsent(s) => format!("!({})", element_exists(s)),
        WaitCondition::Text(t) => text_present(t),
        WaitCondition::UrlChanged(u) => url_changed(u),
    }
}

pub fn fill_element(selector: &str, text: &str) -> String {
    let escaped = escape_selector(selector);
    let escaped_text = escape_selector(text);
    format!(
        r#"(function(){{const el=document.querySelector('{}');if(!el)return{{found:false}};el.scrollIntoView({{block:'center',behavior:'instant'}});el.focus();el.value='{}';el.dispatchEvent(new Event('input',{{bubbles:true}}));el.dispatchEvent(new Event('change',{{bubbles:true}}));return{{found:true}}}})()"#,
        escaped, escaped_text
    )
}

pub fn click_element(selector: &str) -> String {
    let escaped = escape_selector(selector);
    format!(
        r#"(function(){{const el=document.querySelector('{}');if(!el)return{{found:false}};el.scrollIntoView({{block:'center',behavior:'instant'}});el.click();return{{found:true}}}})()"#,
        escaped
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_selector() {
        assert_eq!(escape_selector("div"), "div");
        assert_eq!(escape_selector("input[name='user']"), "input[name=\\'user\\']");
        assert_eq!(escape_selector("div\\class"), "div\\\\class");
    }

    #[test]
    fn test_wait_predicates() {
        assert_eq!(wait_predicate(&WaitCondition::Load), READY_STATE_COMPLETE);
        assert!(
            wait_predicate(&WaitCondition::Selector("#results".into()))
                .contains("querySelector('#results')")
        );
        assert!(wait_predicate(&WaitCondition::SelectorAbsent("form".into())).starts_with("!("));
        assert!(wait_predicate(&WaitCondition::Text("Welcome".into())).contains("'Welcome'"));
        assert!(
            wait_predicate(&WaitCondition::UrlChanged("https://a.test/login".into()))
                .contains("!=='https://a.test/login'")
        );
    }

    #[test]
    fn test_fill_element() {
        let script = fill_element("#input", "it's");
        assert!(script.contains("querySelector('#input')"));
        assert!(script.contains("value='it\\'s'"));
    }

    #[test]
    fn test_click_element() {
        let script = click_element("#btn");
        assert!(script.contains("querySelector('#btn')"));
        assert!(script.contains("click()"));
    }
}

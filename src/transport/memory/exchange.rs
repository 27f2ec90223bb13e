use serde_json::Value;

use crate::{
    topology::{ExchangeConfig, ExchangeKind},
    transport::FieldTable,
};

/// Объявленный exchange и его привязки.
#[derive(Debug, Clone)]
pub(crate) struct Exchange {
    pub name: String,
    pub kind: ExchangeKind,
    pub durable: bool,
    pub auto_delete: bool,
    pub arguments: FieldTable,
    bindings: Vec<Binding>,
    /// Была ли у exchange хотя бы одна привязка (для auto-delete)
    was_bound: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Binding {
    pub queue: String,
    pub routing_key: String,
    pub arguments: FieldTable,
}

impl Exchange {
    pub fn from_config(config: &ExchangeConfig) -> Self {
        Self {
            name: config.name.clone(),
            kind: config.kind,
            durable: config.durable,
            auto_delete: config.auto_delete,
            arguments: config.arguments.clone(),
            bindings: Vec::new(),
            was_bound: false,
        }
    }

    /// Описание расхождения с повторным объявлением или `None`, если
    /// объявления эквивалентны.
    pub fn mismatch(
        &self,
        config: &ExchangeConfig,
    ) -> Option<String> {
        if self.kind != config.kind {
            return Some(format!(
                "type is '{}', requested '{}'",
                self.kind, config.kind
            ));
        }
        if self.durable != config.durable {
            return Some(format!(
                "durable is {}, requested {}",
                self.durable, config.durable
            ));
        }
        if self.auto_delete != config.auto_delete {
            return Some(format!(
                "auto_delete is {}, requested {}",
                self.auto_delete, config.auto_delete
            ));
        }
        if self.arguments != config.arguments {
            return Some("arguments differ".to_string());
        }
        None
    }

    /// Добавляет привязку. Идентичная привязка хранится один раз.
    pub fn bind(
        &mut self,
        binding: Binding,
    ) -> bool {
        self.was_bound = true;
        if self.bindings.contains(&binding) {
            return false;
        }
        self.bindings.push(binding);
        true
    }

    /// Удаляет все привязки очереди.
    pub fn unbind_queue(
        &mut self,
        queue: &str,
    ) {
        self.bindings.retain(|b| b.queue != queue);
    }

    /// Auto-delete exchange удаляется, когда у него не осталось привязок.
    pub fn is_unused(&self) -> bool {
        self.auto_delete && self.was_bound && self.bindings.is_empty()
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    /// Имена очередей, в которые попадает сообщение. Каждая очередь
    /// встречается не более одного раза.
    pub fn route(
        &self,
        routing_key: &str,
        headers: &FieldTable,
    ) -> Vec<String> {
        let mut targets: Vec<String> = Vec::new();
        for binding in &self.bindings {
            let matched = match self.kind {
                ExchangeKind::Direct => binding.routing_key == routing_key,
                ExchangeKind::Fanout => true,
                ExchangeKind::Topic => topic_matches(&binding.routing_key, routing_key),
                ExchangeKind::Headers => headers_match(&binding.arguments, headers),
            };
            if matched && !targets.iter().any(|q| q == &binding.queue) {
                targets.push(binding.queue.clone());
            }
        }
        targets
    }
}

/// Сопоставление routing key с шаблоном topic exchange.
///
/// Слова разделены `.`; `*` заменяет ровно одно слово, `#` ноль или больше.
pub fn topic_matches(
    pattern: &str,
    routing_key: &str,
) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    match_words(&pattern, &key)
}

fn match_words(
    pattern: &[&str],
    key: &[&str],
) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => {
            // Подряд идущие `#` эквивалентны одному
            if rest.first() == Some(&"#") {
                return match_words(rest, key);
            }
            (0..=key.len()).any(|skip| match_words(rest, &key[skip..]))
        }
        Some((&"*", rest)) => !key.is_empty() && match_words(rest, &key[1..]),
        Some((word, rest)) => key.first() == Some(word) && match_words(rest, &key[1..]),
    }
}

/// Сопоставление заголовков сообщения с аргументами привязки headers
/// exchange.
///
/// `x-match` = `all` (по умолчанию) требует совпадения всех пар, `any`
/// хотя бы одной. Ключи с префиксом `x-` в сравнении не участвуют.
/// Значение `null` в привязке проверяет только наличие заголовка.
pub fn headers_match(
    binding_args: &FieldTable,
    headers: &FieldTable,
) -> bool {
    let match_any = matches!(binding_args.get("x-match"), Some(Value::String(m)) if m == "any");

    let mut pairs = binding_args
        .iter()
        .filter(|(k, _)| !k.starts_with("x-"))
        .peekable();

    if pairs.peek().is_none() {
        return !match_any;
    }

    let mut check = |(key, expected): (&String, &Value)| match headers.get(key) {
        Some(actual) => expected.is_null() || actual == expected,
        None => false,
    };

    if match_any {
        pairs.any(&mut check)
    } else {
        pairs.all(&mut check)
    }
}

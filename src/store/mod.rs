//! Phrase store
//!
//! Phrases live in a JSON file as a flat array of `(id, category, text)`
//! records.
//! Every mutation is written through to disk. On first run the file is
//! created with the default board.

use crate::{Result, XtalkError};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default board: category key and its phrases, in display order
const DEFAULT_BOARD: &[(&str, &[&str])] = &[
    (
        "clothing_food_housing_transport",
        &[
            "我", "你", "他", "家", "爸", "妈", "儿子", "女儿", "爷爷", "奶奶", "姥姥", "姥爷", "老婆", "男",
            "女", "亲戚", "哥", "姐", "妹", "姑", "姨", "舅", "叔", "表", "老师", "医生", "谁",
        ],
    ),
    (
        "relationships",
        &["是", "不是", "有", "没有", "不", "别", "什么", "吗", "了", "和", "的", "在"],
    ),
    (
        "actions",
        &["上", "下", "左", "右", "面", "前", "后", "里", "外", "哪", "那"],
    ),
    (
        "emotions",
        &[
            "吃", "想", "说", "去", "看", "听", "喝", "用", "睡", "走", "穿", "脱", "来", "等", "坐", "站",
            "买", "借", "需要", "好", "不好", "洗澡", "刷牙", "剪",
        ],
    ),
    (
        "requests",
        &[
            "饿", "渴", "困", "疼", "痒", "高兴", "难受", "生气", "害怕", "新", "旧", "老", "干净", "脏",
            "快", "慢", "大", "小", "多", "少", "冷", "热",
        ],
    ),
    (
        "other",
        &[
            "1", "2", "3", "4", "5", "6", "7", "8", "9", "0", "个", "十", "百", "千", "万", "点", "块",
        ],
    ),
    (
        "time",
        &["今天", "明天", "后天", "昨天", "以前", "以后", "时候", "早上", "中午", "晚上", "刚才"],
    ),
    (
        "noun",
        &[
            "医院", "药", "电话", "车", "房子", "床", "钱", "红包", "电视", "手机", "饮料", "水", "饭",
            "肉", "东西", "头", "胳膊", "手", "腿", "头发", "脚", "衣服", "鞋", "厕所",
        ],
    ),
];

/// One phrase on the board
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phrase {
    pub id: u64,
    pub category: String,
    pub text: String,
}

/// Categorized phrase collection
pub struct PhraseStore {
    /// Backing file; `None` keeps the store in memory
    path: Option<PathBuf>,
    phrases: Vec<Phrase>,
    next_id: u64,
}

impl PhraseStore {
    /// Empty store that is never written to disk
    pub fn in_memory() -> Self {
        Self {
            path: None,
            phrases: Vec::new(),
            next_id: 1,
        }
    }

    /// In-memory store holding the default board
    pub fn seeded() -> Self {
        let mut store = Self::in_memory();
        store.seed();
        store
    }

    /// Load the store at `path`, creating it with the default board if missing
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        debug!("Opening phrase store {:?}", path);

        if path.exists() {
            let text = fs::read_to_string(&path)?;
            let phrases: Vec<Phrase> = serde_json::from_str(&text)?;
            let next_id = phrases.iter().map(|p| p.id).max().unwrap_or(0) + 1;
            debug!("Loaded {} phrase(s)", phrases.len());
            return Ok(Self {
                path: Some(path),
                phrases,
                next_id,
            });
        }

        info!("Phrase store not found, creating default board at {:?}", path);
        let mut store = Self::seeded();
        store.path = Some(path);
        store.save()?;
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write the store to its file (no-op in memory)
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let text = serde_json::to_string_pretty(&self.phrases)?;
        fs::write(path, text)?;
        debug!("Saved {} phrase(s) to {:?}", self.phrases.len(), path);
        Ok(())
    }

    fn seed(&mut self) {
        for (category, phrases) in DEFAULT_BOARD {
            for text in *phrases {
                self.insert(category, text);
            }
        }
    }

    fn insert(&mut self, category: &str, text: &str) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.phrases.push(Phrase {
            id,
            category: category.to_string(),
            text: text.to_string(),
        });
        id
    }

    fn validate(category: &str, text: &str) -> Result<(String, String)> {
        let category = category.trim();
        let text = text.trim();
        if category.is_empty() {
            return Err(XtalkError::Store("Category must not be empty".to_string()));
        }
        if text.is_empty() {
            return Err(XtalkError::Store("Phrase must not be empty".to_string()));
        }
        Ok((category.to_string(), text.to_string()))
    }

    /// Distinct categories in first-seen order
    pub fn list_categories(&self) -> Vec<String> {
        let mut categories: Vec<String> = Vec::new();
        for phrase in &self.phrases {
            if !categories.contains(&phrase.category) {
                categories.push(phrase.category.clone());
            }
        }
        categories
    }

    /// Phrase texts of one category in insertion order
    pub fn list_phrases(&self, category: &str) -> Vec<String> {
        self.phrases
            .iter()
            .filter(|p| p.category == category)
            .map(|p| p.text.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.phrases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }

    /// Add a phrase unless the category already has it; returns its id
    pub fn upsert_phrase(&mut self, category: &str, text: &str) -> Result<u64> {
        let (category, text) = Self::validate(category, text)?;
        if let Some(existing) = self
            .phrases
            .iter()
            .find(|p| p.category == category && p.text == text)
        {
            return Ok(existing.id);
        }

        let id = self.insert(&category, &text);
        debug!("Added phrase {} to {}", text, category);
        self.save()?;
        Ok(id)
    }

    /// Remove every phrase matching category and text; returns how many went
    pub fn delete_by_category_and_text(&mut self, category: &str, text: &str) -> Result<usize> {
        let before = self.phrases.len();
        self.phrases
            .retain(|p| !(p.category == category && p.text == text.trim()));
        let removed = before - self.phrases.len();
        if removed > 0 {
            debug!("Removed {} from {}", text, category);
            self.save()?;
        }
        Ok(removed)
    }

    pub fn get(&self, id: u64) -> Option<&Phrase> {
        self.phrases.iter().find(|p| p.id == id)
    }

    /// Rewrite a phrase in place; false if no phrase has `id`
    pub fn update(&mut self, id: u64, category: &str, text: &str) -> Result<bool> {
        let (category, text) = Self::validate(category, text)?;
        let Some(phrase) = self.phrases.iter_mut().find(|p| p.id == id) else {
            return Ok(false);
        };
        phrase.category = category;
        phrase.text = text;
        self.save()?;
        Ok(true)
    }

    /// Remove a phrase by id; false if it did not exist
    pub fn delete(&mut self, id: u64) -> Result<bool> {
        let before = self.phrases.len();
        self.phrases.retain(|p| p.id != id);
        if self.phrases.len() == before {
            return Ok(false);
        }
        self.save()?;
        Ok(true)
    }

    /// Edit a phrase: drop `old` from the category and add `new`
    pub fn replace_phrase(&mut self, category: &str, old: &str, new: &str) -> Result<u64> {
        Self::validate(category, new)?;
        self.delete_by_category_and_text(category, old)?;
        self.upsert_phrase(category, new)
    }
}

impl Default for PhraseStore {
    fn default() -> Self {
        Self::seeded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_board() {
        let store = PhraseStore::seeded();
        let categories = store.list_categories();
        assert_eq!(categories.len(), 8);
        assert_eq!(categories[0], "clothing_food_housing_transport");
        assert_eq!(categories[7], "noun");
        assert_eq!(store.list_phrases("time")[0], "今天");
        assert!(store.list_phrases("nothing").is_empty());
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let mut store = PhraseStore::in_memory();
        let a = store.upsert_phrase("noun", "水").unwrap();
        let b = store.upsert_phrase("noun", " 水 ").unwrap();
        assert_eq!(a, b);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_rejects_blank_input() {
        let mut store = PhraseStore::in_memory();
        assert!(store.upsert_phrase("", "水").is_err());
        assert!(store.upsert_phrase("noun", "  ").is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_update_and_delete_by_id() {
        let mut store = PhraseStore::in_memory();
        let id = store.upsert_phrase("noun", "水").unwrap();
        assert!(store.update(id, "noun", "茶").unwrap());
        assert_eq!(store.get(id).unwrap().text, "茶");
        assert!(!store.update(999, "noun", "x").unwrap());
        assert!(store.delete(id).unwrap());
        assert!(!store.delete(id).unwrap());
        assert!(store.get(id).is_none());
    }
}

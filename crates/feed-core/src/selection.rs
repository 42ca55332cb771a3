use crate::types::{Notification, NotificationId};

/// Set of notifications picked for a bulk action, kept in pick order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionSet {
    ids: Vec<NotificationId>,
}

impl SelectionSet {
    pub fn ids(&self) -> &[NotificationId] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: &NotificationId) -> bool {
        self.ids.contains(id)
    }

    /// Select `id`, or deselect it when already selected.
    pub fn toggle(&mut self, id: NotificationId) {
        if let Some(idx) = self.ids.iter().position(|selected| *selected == id) {
            self.ids.remove(idx);
        } else {
            self.ids.push(id);
        }
    }

    /// Select every visible notification, or clear when all of them are
    /// already selected.
    pub fn toggle_all(&mut self, visible: &[Notification]) {
        if !visible.is_empty() && self.ids.len() == visible.len() {
            self.ids.clear();
        } else {
            self.ids = visible.iter().map(|n| n.id.clone()).collect();
        }
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    /// Drop selected IDs that are no longer visible.
    pub fn retain_visible(&mut self, visible: &[Notification]) {
        self.ids
            .retain(|id| visible.iter().any(|notification| &notification.id == id));
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn item(id: u64) -> Notification {
        Notification {
            id: NotificationId::Number(id),
            title: String::new(),
            message: String::new(),
            timestamp: Utc::now(),
            is_read: false,
        }
    }

    #[test]
    fn toggles_single_ids() {
        let mut selection = SelectionSet::default();
        selection.toggle(NotificationId::Number(1));
        selection.toggle(NotificationId::Number(2));
        selection.toggle(NotificationId::Number(1));

        assert_eq!(selection.ids(), &[NotificationId::Number(2)]);
        assert!(selection.contains(&NotificationId::Number(2)));
    }

    #[test]
    fn toggle_all_selects_then_clears() {
        let visible = vec![item(1), item(2), item(3)];
        let mut selection = SelectionSet::default();
        selection.toggle(NotificationId::Number(2));

        selection.toggle_all(&visible);
        assert_eq!(selection.len(), 3);

        selection.toggle_all(&visible);
        assert!(selection.is_empty());
    }

    #[test]
    fn retains_only_visible_ids() {
        let mut selection = SelectionSet::default();
        selection.toggle(NotificationId::Number(1));
        selection.toggle(NotificationId::Number(5));

        selection.retain_visible(&[item(1), item(2)]);
        assert_eq!(selection.ids(), &[NotificationId::Number(1)]);
    }
}

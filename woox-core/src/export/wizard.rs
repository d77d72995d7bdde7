use std::time::Duration;

use futures::future::LocalBoxFuture;
use tracing::debug;
use url::Url;

use crate::browser::{interact, DrivenPage, RetryPolicy};
use crate::config::{SelectorSection, TimeoutsSection, WizardSection};

use super::error::{ExportError, ExportResult};
use super::steps::{StepAction, StepCheck, StepDefinition};

fn action<F>(f: F) -> StepAction
where
    F: for<'a> Fn(&'a dyn DrivenPage) -> LocalBoxFuture<'a, ExportResult<()>> + 'static,
{
    Box::new(f)
}

fn check<F>(f: F) -> StepCheck
where
    F: for<'a> Fn(&'a dyn DrivenPage) -> LocalBoxFuture<'a, ExportResult<bool>> + 'static,
{
    Box::new(f)
}

fn js_str(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

fn js_list(values: &[String]) -> String {
    serde_json::to_string(values).unwrap_or_else(|_| "[]".to_string())
}

/// The WebToffee Import/Export wizard for WooCommerce subscriptions, as an
/// ordered list of step definitions. All selectors and labels come from
/// configuration; the sequencer itself knows nothing about this flow.
pub fn subscription_export_steps(
    selectors: &SelectorSection,
    wizard: &WizardSection,
    timeouts: &TimeoutsSection,
    retry: &RetryPolicy,
    wizard_url: &Url,
) -> Vec<StepDefinition> {
    let interaction = timeouts.interaction();
    let poll = timeouts.poll_interval();

    vec![
        open_wizard(selectors, timeouts, wizard_url),
        choose_subscription_type(selectors, retry, interaction, poll),
        choose_export_method(selectors, timeouts, retry),
        filter_status(selectors, wizard, timeouts, retry),
        map_columns(selectors, wizard, timeouts, retry),
        advanced_options(selectors, timeouts, retry),
        trigger_export(selectors, retry, interaction, poll),
    ]
}

fn open_wizard(
    selectors: &SelectorSection,
    timeouts: &TimeoutsSection,
    wizard_url: &Url,
) -> StepDefinition {
    let url = wizard_url.to_string();
    let interaction = timeouts.interaction();
    let poll = timeouts.poll_interval();
    let card = selectors.post_type_card.clone();

    StepDefinition::new(
        "open-export-wizard",
        action(move |page| {
            let url = url.clone();
            Box::pin(async move {
                page.navigate(&url).await?;
                interact::wait_document_ready(page, interaction, poll).await?;
                interact::wait_ajax_idle(page, interaction, poll).await?;
                Ok(())
            })
        }),
        check(move |page| {
            let card = card.clone();
            Box::pin(async move { Ok(page.element_state(&card).await?.present) })
        }),
    )
}

fn choose_subscription_type(
    selectors: &SelectorSection,
    retry: &RetryPolicy,
    interaction: Duration,
    poll: Duration,
) -> StepDefinition {
    let card = selectors.post_type_card.clone();
    let card_for_check = card.clone();
    let retry = retry.clone();

    StepDefinition::new(
        "choose-subscription-type",
        action(move |page| {
            let card = card.clone();
            let retry = retry.clone();
            Box::pin(async move {
                if card_selected(page, &card).await? {
                    debug!("subscription card already selected");
                    return Ok(());
                }
                interact::wait_interactable(page, &card, interaction, poll).await?;
                retry
                    .run(|_| async { interact::click_robust(page, &card).await })
                    .await?;
                Ok(())
            })
        }),
        check(move |page| {
            let card = card_for_check.clone();
            Box::pin(async move { card_selected(page, &card).await })
        }),
    )
}

async fn card_selected(page: &dyn DrivenPage, card: &str) -> ExportResult<bool> {
    let class = page.attribute(card, "class").await?;
    Ok(class.map(|value| value.contains("selected")).unwrap_or(false))
}

fn choose_export_method(
    selectors: &SelectorSection,
    timeouts: &TimeoutsSection,
    retry: &RetryPolicy,
) -> StepDefinition {
    let button = selectors.method_step_button.clone();
    let radio = selectors.new_export_radio.clone();
    let radio_for_check = radio.clone();
    let retry = retry.clone();
    let interaction = timeouts.interaction();
    let poll = timeouts.poll_interval();

    StepDefinition::new(
        "choose-export-method",
        action(move |page| {
            let button = button.clone();
            let radio = radio.clone();
            let retry = retry.clone();
            Box::pin(async move {
                retry
                    .run(|_| async { interact::click_robust(page, &button).await })
                    .await?;
                interact::wait_document_ready(page, interaction, poll).await?;
                interact::wait_ajax_idle(page, interaction, poll).await?;
                interact::wait_interactable(page, &radio, interaction, poll).await?;
                page.set_checked(&radio, true).await?;
                Ok(())
            })
        }),
        check(move |page| {
            let radio = radio_for_check.clone();
            Box::pin(async move { Ok(page.element_state(&radio).await?.checked) })
        }),
    )
}

fn filter_status(
    selectors: &SelectorSection,
    wizard: &WizardSection,
    timeouts: &TimeoutsSection,
    retry: &RetryPolicy,
) -> StepDefinition {
    let button = selectors.filter_step_button.clone();
    let dropdown = selectors.status_dropdown.clone();
    let options = selectors.status_option.clone();
    let token_remove = selectors.token_remove.clone();
    let labels = status_labels(wizard);
    let retry = retry.clone();
    let interaction = timeouts.interaction();
    let poll = timeouts.poll_interval();

    let chip = selectors.status_chip.clone();
    let labels_for_check = labels.clone();

    StepDefinition::new(
        "filter-active-status",
        action(move |page| {
            let button = button.clone();
            let dropdown = dropdown.clone();
            let options = options.clone();
            let token_remove = token_remove.clone();
            let labels = labels.clone();
            let retry = retry.clone();
            Box::pin(async move {
                retry
                    .run(|_| async { interact::click_robust(page, &button).await })
                    .await?;
                interact::wait_document_ready(page, interaction, poll).await?;
                interact::wait_ajax_idle(page, interaction, poll).await?;

                let opener =
                    interact::first_interactable(page, &dropdown, interaction, poll).await?;
                interact::click_robust(page, &opener).await?;
                clear_tokens(page, &token_remove).await?;
                select_status_option(page, &options, &labels, &retry).await?;
                Ok(())
            })
        }),
        check(move |page| {
            let chip = chip.clone();
            let labels = labels_for_check.clone();
            Box::pin(async move { chip_present(page, &chip, &labels).await })
        }),
    )
}

fn status_labels(wizard: &WizardSection) -> Vec<String> {
    let mut labels = vec![wizard.status.clone()];
    labels.extend(wizard.status_labels.iter().cloned());
    labels
}

async fn clear_tokens(page: &dyn DrivenPage, token_remove: &str) -> ExportResult<()> {
    let script = format!(
        r#"(() => {{
    document.querySelectorAll({sel}).forEach(el => el.click());
    return true;
}})()"#,
        sel = js_str(token_remove)
    );
    page.eval(&script).await?;
    Ok(())
}

/// Identifier-based locator first, visible-label scan second, for the same
/// logical target. Both strategies live here so the sequencer never
/// branches on incidental page content.
async fn select_status_option(
    page: &dyn DrivenPage,
    options: &[String],
    labels: &[String],
    retry: &RetryPolicy,
) -> ExportResult<()> {
    for selector in options {
        let state = page.element_state(selector).await?;
        if state.present && state.visible {
            retry
                .run(|_| async { interact::click_robust(page, selector).await })
                .await?;
            return Ok(());
        }
    }

    let script = format!(
        r#"(() => {{
    const want = {labels}.map(label => label.toLowerCase());
    const options = document.querySelectorAll('li.select2-results__option');
    for (const option of options) {{
        const text = (option.innerText || option.textContent || '').trim().toLowerCase();
        if (want.some(label => text === label || text.includes(label))) {{
            option.click();
            return true;
        }}
    }}
    return false;
}})()"#,
        labels = js_list(labels)
    );
    let clicked = page.eval(&script).await?;
    if clicked.as_bool().unwrap_or(false) {
        Ok(())
    } else {
        Err(ExportError::step(
            "filter-active-status",
            "no status option matched the configured labels",
        ))
    }
}

async fn chip_present(
    page: &dyn DrivenPage,
    chip: &str,
    labels: &[String],
) -> ExportResult<bool> {
    let script = format!(
        r#"(() => {{
    const want = {labels}.map(label => label.toLowerCase());
    const chips = document.querySelectorAll({chip});
    for (const chip of chips) {{
        const text = ((chip.innerText || chip.textContent || '') + ' ' +
            (chip.getAttribute('title') || '')).toLowerCase();
        if (want.some(label => text.includes(label))) return true;
    }}
    return false;
}})()"#,
        labels = js_list(labels),
        chip = js_str(chip)
    );
    Ok(page.eval(&script).await?.as_bool().unwrap_or(false))
}

fn map_columns(
    selectors: &SelectorSection,
    wizard: &WizardSection,
    timeouts: &TimeoutsSection,
    retry: &RetryPolicy,
) -> StepDefinition {
    let button = selectors.mapping_step_button.clone();
    let table = selectors.mapping_table.clone();
    let boxes = selectors.column_checkboxes.clone();
    let meta_header = selectors.meta_box_header.clone();
    let columns = wizard.columns.clone();
    let meta_fields = wizard.meta_fields.clone();
    let retry = retry.clone();
    let interaction = timeouts.interaction();
    let poll = timeouts.poll_interval();

    let boxes_for_check = boxes.clone();
    let columns_for_check = columns.clone();

    StepDefinition::new(
        "map-columns",
        action(move |page| {
            let button = button.clone();
            let table = table.clone();
            let boxes = boxes.clone();
            let meta_header = meta_header.clone();
            let columns = columns.clone();
            let meta_fields = meta_fields.clone();
            let retry = retry.clone();
            Box::pin(async move {
                retry
                    .run(|_| async { interact::click_robust(page, &button).await })
                    .await?;
                interact::wait_document_ready(page, interaction, poll).await?;
                interact::wait_ajax_idle(page, interaction, poll).await?;
                interact::wait_interactable(page, &table, interaction, poll).await?;

                set_columns(page, &boxes, &columns).await?;

                // The extra-meta box is collapsed by default; a theme that
                // hides the header entirely is not fatal.
                if let Err(err) = interact::click_robust(page, &meta_header).await {
                    debug!(error = %err, "meta box header not clickable, continuing");
                }
                set_meta_fields(page, &meta_fields).await?;
                Ok(())
            })
        }),
        check(move |page| {
            let boxes = boxes_for_check.clone();
            let columns = columns_for_check.clone();
            Box::pin(async move { columns_applied(page, &boxes, &columns).await })
        }),
    )
}

async fn set_columns(
    page: &dyn DrivenPage,
    boxes: &str,
    columns: &[String],
) -> ExportResult<()> {
    let script = format!(
        r#"(() => {{
    const desired = {desired};
    const boxes = document.querySelectorAll({boxes});
    if (!boxes.length) return false;
    boxes.forEach(box => {{
        const want = desired.includes(box.value || '');
        if (box.checked !== want) box.click();
    }});
    return true;
}})()"#,
        desired = js_list(columns),
        boxes = js_str(boxes)
    );
    if page.eval(&script).await?.as_bool().unwrap_or(false) {
        Ok(())
    } else {
        Err(ExportError::step(
            "map-columns",
            "column checkboxes not found in the mapping table",
        ))
    }
}

async fn set_meta_fields(page: &dyn DrivenPage, meta_fields: &[String]) -> ExportResult<()> {
    if meta_fields.is_empty() {
        return Ok(());
    }
    let script = format!(
        r#"(() => {{
    const keep = {keep};
    let found = false;
    document.querySelectorAll('label').forEach(label => {{
        const text = (label.innerText || label.textContent || '').trim();
        if (!text.startsWith('meta:')) return;
        let box = null;
        const prev = label.previousElementSibling;
        if (prev && prev.tagName === 'INPUT' && prev.type === 'checkbox') {{
            box = prev;
        }} else if (label.htmlFor) {{
            box = document.getElementById(label.htmlFor);
        }}
        if (!box) return;
        const want = keep.includes(text);
        if (want) found = true;
        if (box.checked !== want) box.click();
    }});
    return found;
}})()"#,
        keep = js_list(meta_fields)
    );
    if page.eval(&script).await?.as_bool().unwrap_or(false) {
        Ok(())
    } else {
        Err(ExportError::step(
            "map-columns",
            "none of the configured meta fields were found",
        ))
    }
}

async fn columns_applied(
    page: &dyn DrivenPage,
    boxes: &str,
    columns: &[String],
) -> ExportResult<bool> {
    let script = format!(
        r#"(() => {{
    const desired = {desired};
    const boxes = document.querySelectorAll({boxes});
    if (!boxes.length) return false;
    const checked = new Set();
    boxes.forEach(box => {{
        if (box.checked) checked.add(box.value || '');
    }});
    return desired.every(key => checked.has(key));
}})()"#,
        desired = js_list(columns),
        boxes = js_str(boxes)
    );
    Ok(page.eval(&script).await?.as_bool().unwrap_or(false))
}

fn advanced_options(
    selectors: &SelectorSection,
    timeouts: &TimeoutsSection,
    retry: &RetryPolicy,
) -> StepDefinition {
    let button = selectors.advanced_step_button.clone();
    let export_buttons = selectors.export_buttons.clone();
    let retry = retry.clone();
    let interaction = timeouts.interaction();
    let poll = timeouts.poll_interval();

    StepDefinition::new(
        "advanced-options",
        action(move |page| {
            let button = button.clone();
            let retry = retry.clone();
            Box::pin(async move {
                retry
                    .run(|_| async { interact::click_robust(page, &button).await })
                    .await?;
                interact::wait_document_ready(page, interaction, poll).await?;
                interact::wait_ajax_idle(page, interaction, poll).await?;
                Ok(())
            })
        }),
        check(move |page| {
            let export_buttons = export_buttons.clone();
            Box::pin(async move {
                for selector in &export_buttons {
                    let state = page.element_state(selector).await?;
                    if state.present && state.visible {
                        return Ok(true);
                    }
                }
                Ok(false)
            })
        }),
    )
}

fn trigger_export(
    selectors: &SelectorSection,
    retry: &RetryPolicy,
    interaction: Duration,
    poll: Duration,
) -> StepDefinition {
    let export_buttons = selectors.export_buttons.clone();
    let loader_box = selectors.loader_box.clone();
    let retry = retry.clone();

    StepDefinition::new(
        "trigger-export",
        action(move |page| {
            let export_buttons = export_buttons.clone();
            let retry = retry.clone();
            Box::pin(async move {
                let button =
                    interact::first_interactable(page, &export_buttons, interaction, poll).await?;
                retry
                    .run(|_| async { interact::click_robust(page, &button).await })
                    .await?;
                Ok(())
            })
        }),
        check(move |page| {
            let loader_box = loader_box.clone();
            Box::pin(async move { Ok(page.element_state(&loader_box).await?.present) })
        }),
    )
}

//! Render-ready document model and the HTML template that prints it.

use crate::models::{
    Address, ClientProfile, CompanyProfile, Invoice, InvoiceStatus, InvoiceTotals, Order,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Which document is printed for an invoice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocType {
    /// Full invoice with prices and totals.
    #[default]
    #[serde(alias = "FACTURE")]
    Facture,
    /// Delivery note: quantities only.
    #[serde(alias = "BL")]
    Bl,
}

impl DocType {
    pub fn file_prefix(&self) -> &'static str {
        match self {
            DocType::Facture => "FACTURE",
            DocType::Bl => "BL",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            DocType::Facture => "Facture",
            DocType::Bl => "Bon de livraison",
        }
    }

    /// Archive entry and download name, e.g. `FACTURE-FC-3-2025.pdf`.
    pub fn file_name(&self, reference: &str) -> String {
        format!("{}-{}.pdf", self.file_prefix(), reference)
    }

    pub fn shows_prices(&self) -> bool {
        matches!(self, DocType::Facture)
    }
}

impl std::str::FromStr for DocType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "facture" => Ok(DocType::Facture),
            "bl" => Ok(DocType::Bl),
            _ => Err(format!("Invalid document type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PartyBlock {
    pub name: String,
    pub lines: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LineRow {
    pub reference: String,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub discount: Decimal,
    pub tax_rate: Decimal,
    pub total_ex_tax: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentModel {
    pub doc_type: DocType,
    pub reference: String,
    pub order_reference: String,
    pub issued_on: String,
    pub ordered_on: String,
    pub company: PartyBlock,
    pub logo_url: Option<String>,
    pub client: PartyBlock,
    pub shipping: Option<PartyBlock>,
    pub payment_method: String,
    pub delivery_method: String,
    pub lines: Vec<LineRow>,
    pub totals: InvoiceTotals,
    /// Set when the invoice is cancelled.
    pub status_label: Option<String>,
}

fn address_lines(address: &Address) -> Vec<String> {
    let mut lines = vec![address.line1.clone()];
    if let Some(line2) = address.line2.as_ref().filter(|l| !l.is_empty()) {
        lines.push(line2.clone());
    }
    lines.push(format!("{} {}", address.postal_code, address.city).trim().to_string());
    lines.push(address.country.clone());
    lines.retain(|l| !l.is_empty());
    lines
}

impl DocumentModel {
    pub fn build(
        invoice: &Invoice,
        order: &Order,
        company: &CompanyProfile,
        client: Option<&ClientProfile>,
        doc_type: DocType,
    ) -> Self {
        let snapshot = &invoice.snapshot;

        let mut company_lines = address_lines(&company.address);
        company_lines.extend(company.siret.iter().map(|s| format!("SIRET : {}", s)));
        company_lines.extend(company.vat_number.iter().map(|v| format!("TVA : {}", v)));
        company_lines.extend(company.email.iter().cloned());
        company_lines.extend(company.phone.iter().cloned());

        let client_block = match client {
            Some(profile) => {
                let mut lines = Vec::new();
                lines.extend(profile.company_name.iter().cloned());
                if let Some(address) = &profile.billing_address {
                    lines.extend(address_lines(address));
                }
                lines.push(
                    profile
                        .email
                        .clone()
                        .unwrap_or_else(|| snapshot.client.email.clone()),
                );
                lines.extend(profile.phone.iter().cloned());
                PartyBlock {
                    name: profile.display_name.clone(),
                    lines,
                }
            }
            None => {
                let mut lines = vec![snapshot.client.email.clone()];
                lines.extend(snapshot.client.phone.iter().cloned());
                PartyBlock {
                    name: snapshot.client.full_name(),
                    lines,
                }
            }
        };

        let shipping = match (&snapshot.delivery, &snapshot.pickup) {
            (Some(delivery), _) => Some(PartyBlock {
                name: delivery.recipient.clone(),
                lines: address_lines(&delivery.address),
            }),
            (None, Some(pickup)) => Some(PartyBlock {
                name: format!("Point relais : {}", pickup.name),
                lines: address_lines(&pickup.address),
            }),
            (None, None) => None,
        };

        let lines = snapshot
            .items
            .iter()
            .map(|line| LineRow {
                reference: line.reference.clone(),
                name: line.name.clone(),
                quantity: line.quantity,
                unit_price: line.unit_price,
                discount: line.discount,
                tax_rate: line.tax_rate,
                total_ex_tax: line.net().round_dp(2),
            })
            .collect();

        Self {
            doc_type,
            reference: invoice.reference.clone(),
            order_reference: order.reference.clone(),
            issued_on: invoice.issued_at.format("%d/%m/%Y").to_string(),
            ordered_on: order.created_at.format("%d/%m/%Y").to_string(),
            company: PartyBlock {
                name: company.name.clone(),
                lines: company_lines,
            },
            logo_url: company.logo_url.clone(),
            client: client_block,
            shipping,
            payment_method: snapshot.payment_method.clone(),
            delivery_method: snapshot.delivery_method.clone(),
            lines,
            totals: snapshot.totals.clone(),
            status_label: (invoice.status == InvoiceStatus::Cancelled)
                .then(|| "ANNULÉE".to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderedTemplate {
    pub html: String,
    pub css: String,
}

pub trait TemplateGenerator: Send + Sync {
    fn generate(&self, model: &DocumentModel) -> RenderedTemplate;
}

const STYLESHEET: &str = r#"
body { font-family: "Helvetica Neue", Arial, sans-serif; font-size: 11px; color: #222; }
header { display: flex; justify-content: space-between; margin-bottom: 24px; }
header img { max-height: 60px; }
h1 { font-size: 20px; margin: 0 0 4px 0; }
.parties { display: flex; gap: 24px; margin-bottom: 24px; }
.party { flex: 1; border: 1px solid #ddd; padding: 8px; }
.party h2 { font-size: 12px; margin: 0 0 4px 0; }
.status { color: #b00020; font-size: 18px; font-weight: bold; border: 2px solid #b00020; padding: 4px 8px; }
table { width: 100%; border-collapse: collapse; }
th, td { border-bottom: 1px solid #eee; padding: 4px; text-align: left; }
td.num, th.num { text-align: right; }
.totals { margin-top: 16px; margin-left: auto; width: 40%; }
"#;

/// Built-in HTML layout for both document types.
#[derive(Debug, Clone, Default)]
pub struct HtmlTemplate;

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn money(value: Decimal) -> String {
    format!("{:.2} €", value)
}

fn party_html(class: &str, title: Option<&str>, block: &PartyBlock) -> String {
    let heading = title
        .map(|t| format!("<h2>{}</h2>", escape(t)))
        .unwrap_or_default();
    let lines: String = block
        .lines
        .iter()
        .map(|l| format!("<div>{}</div>", escape(l)))
        .collect();
    format!(
        "<div class=\"{}\">{}<strong>{}</strong>{}</div>",
        class,
        heading,
        escape(&block.name),
        lines
    )
}

impl TemplateGenerator for HtmlTemplate {
    fn generate(&self, model: &DocumentModel) -> RenderedTemplate {
        let prices = model.doc_type.shows_prices();
        let mut html = String::new();

        html.push_str("<header><div>");
        if let Some(logo) = &model.logo_url {
            html.push_str(&format!("<img src=\"{}\" alt=\"\">", escape(logo)));
        }
        html.push_str(&party_html("company", None, &model.company));
        html.push_str("</div><div>");
        html.push_str(&format!(
            "<h1>{} {}</h1><div>Date : {}</div><div>Commande : {} du {}</div>",
            escape(model.doc_type.title()),
            escape(&model.reference),
            escape(&model.issued_on),
            escape(&model.order_reference),
            escape(&model.ordered_on),
        ));
        if let Some(label) = &model.status_label {
            html.push_str(&format!("<div class=\"status\">{}</div>", escape(label)));
        }
        html.push_str("</div></header>");

        html.push_str("<section class=\"parties\">");
        html.push_str(&party_html("party", Some("Client"), &model.client));
        if let Some(shipping) = &model.shipping {
            html.push_str(&party_html("party", Some("Livraison"), shipping));
        }
        html.push_str("</section>");

        html.push_str("<table><thead><tr><th>Référence</th><th>Désignation</th><th class=\"num\">Qté</th>");
        if prices {
            html.push_str("<th class=\"num\">PU HT</th><th class=\"num\">Remise</th><th class=\"num\">TVA</th><th class=\"num\">Total HT</th>");
        }
        html.push_str("</tr></thead><tbody>");
        for line in &model.lines {
            html.push_str(&format!(
                "<tr><td>{}</td><td>{}</td><td class=\"num\">{}</td>",
                escape(&line.reference),
                escape(&line.name),
                line.quantity
            ));
            if prices {
                html.push_str(&format!(
                    "<td class=\"num\">{}</td><td class=\"num\">{}</td><td class=\"num\">{} %</td><td class=\"num\">{}</td>",
                    money(line.unit_price),
                    money(line.discount),
                    line.tax_rate.normalize(),
                    money(line.total_ex_tax)
                ));
            }
            html.push_str("</tr>");
        }
        html.push_str("</tbody></table>");

        if prices {
            html.push_str(&format!(
                "<table class=\"totals\"><tr><td>Total HT</td><td class=\"num\">{}</td></tr>\
                 <tr><td>TVA</td><td class=\"num\">{}</td></tr>\
                 <tr><td>Livraison</td><td class=\"num\">{}</td></tr>\
                 <tr><th>Total TTC</th><th class=\"num\">{}</th></tr></table>",
                money(model.totals.subtotal_ex_tax),
                money(model.totals.tax_total),
                money(model.totals.shipping_cost),
                money(model.totals.grand_total_incl_tax),
            ));
        }

        html.push_str(&format!(
            "<footer><div>Paiement : {}</div><div>Mode de livraison : {}</div></footer>",
            escape(&model.payment_method),
            escape(&model.delivery_method)
        ));

        RenderedTemplate {
            html,
            css: STYLESHEET.to_string(),
        }
    }
}

pub mod exports;
pub mod invoices;

pub use exports::ExportRequest;
pub use invoices::{
    BulkDeleteRequest, CreateInvoiceResponse, InvoiceListParams, InvoiceListResponse,
    InvoiceResponse, PdfParams,
};
